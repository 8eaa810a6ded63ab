// src/blockchain/ethereum_client.rs
//! Ethereum JSON-RPC ledger client.
//!
//! Provides the ledger capability against any EVM node hosting the anchor
//! contract:
//! - Connection probing (chain id) per operation
//! - Anchor transaction building, signing via the wallet signer, broadcast
//! - Confirmation tracking from block inclusion to the `finalized` tag
//! - Read-only `verify` queries

use crate::blockchain::{Ledger, LedgerConnection, Subscription, TransactionHandle, TxParam, TxStatus};
use crate::contracts::anchor_registry::AnchorRegistry;
use crate::error::{AnchorError, Result};
use crate::models::credential::ContentFingerprint;
use crate::models::did::Identity;
use crate::wallet::key_management::format_address;
use crate::wallet::TransactionSigner;
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, TransactionRequest, H256, U64};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Settings shared by every connection the ledger opens.
#[derive(Debug, Clone)]
pub struct EthereumSettings {
    /// JSON-RPC endpoint URL
    pub endpoint: String,
    /// Gas limit for anchor transactions (`Auto` = node estimate)
    pub gas_limit: TxParam,
    /// Nonce for anchor transactions (`Auto` = pending transaction count)
    pub nonce: TxParam,
    /// Interval between confirmation polls
    pub poll_interval: Duration,
    /// DID method used when reporting owners
    pub did_method: String,
}

/// Ledger capability backed by an EVM JSON-RPC node.
#[derive(Debug, Clone)]
pub struct EthereumLedger {
    settings: EthereumSettings,
    registry: AnchorRegistry,
}

impl EthereumLedger {
    /// Creates a ledger for the anchor contract at `contract_address`.
    ///
    /// No network traffic happens until [`Ledger::connect`].
    ///
    /// # Errors
    /// Returns `AnchorError::Config` if the contract address is invalid.
    pub fn new(settings: EthereumSettings, contract_address: &str) -> Result<Self> {
        Ok(Self {
            registry: AnchorRegistry::new(contract_address)?,
            settings,
        })
    }
}

#[async_trait]
impl Ledger for EthereumLedger {
    async fn connect(&self) -> Result<Box<dyn LedgerConnection>> {
        let provider = Provider::<Http>::try_from(self.settings.endpoint.as_str())
            .map_err(|e| AnchorError::Connection(format!("invalid endpoint: {}", e)))?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| AnchorError::Connection(e.to_string()))?
            .as_u64();
        info!("connected to {} (chain id {})", self.settings.endpoint, chain_id);

        Ok(Box::new(EthereumConnection {
            provider,
            chain_id,
            settings: self.settings.clone(),
            registry: self.registry.clone(),
            watchers: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

struct EthereumConnection {
    provider: Provider<Http>,
    chain_id: u64,
    settings: EthereumSettings,
    registry: AnchorRegistry,
    /// Confirmation pollers started on this connection
    watchers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EthereumConnection {
    /// Stops every confirmation poller started on this connection.
    fn abort_watchers(&self) -> usize {
        let watchers: Vec<_> = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for watcher in &watchers {
            watcher.abort();
        }
        watchers.len()
    }

    /// Resolves gas and nonce, honouring fixed configuration values.
    async fn populate(&self, tx: &mut TypedTransaction, from: Address) -> Result<()> {
        match self.settings.nonce {
            TxParam::Fixed(n) => {
                tx.set_nonce(n);
            }
            TxParam::Auto => {
                let nonce = self
                    .provider
                    .get_transaction_count(from, Some(BlockNumber::Pending.into()))
                    .await
                    .map_err(|e| AnchorError::Connection(e.to_string()))?;
                tx.set_nonce(nonce);
            }
        }

        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| AnchorError::Connection(e.to_string()))?;
        tx.set_gas_price(gas_price);

        match self.settings.gas_limit {
            TxParam::Fixed(g) => {
                tx.set_gas(g);
            }
            TxParam::Auto => {
                // A failing estimate means the call would revert.
                let gas = self
                    .provider
                    .estimate_gas(tx, None)
                    .await
                    .map_err(|e| AnchorError::Dispatch(e.to_string()))?;
                tx.set_gas(gas);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerConnection for EthereumConnection {
    async fn anchor(
        &self,
        fingerprint: &ContentFingerprint,
        signing_address: &str,
        signer: Arc<dyn TransactionSigner>,
    ) -> Result<TransactionHandle> {
        let from: Address = signing_address.parse().map_err(|_| {
            AnchorError::IdentityMismatch(format!("{} is not an account address", signing_address))
        })?;

        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(self.registry.address())
            .data(self.registry.encode_anchor(fingerprint)?)
            .chain_id(self.chain_id)
            .into();
        self.populate(&mut tx, from).await?;

        let signature = signer.sign(&tx).await?;
        let raw = tx.rlp_signed(&signature);
        let tx_hash = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| AnchorError::Dispatch(e.to_string()))?
            .tx_hash();
        info!("broadcast anchor transaction {:?} for {}", tx_hash, fingerprint);

        let (events, rx) = mpsc::unbounded_channel();
        let watcher = tokio::spawn(watch_confirmations(
            self.provider.clone(),
            tx_hash,
            self.settings.poll_interval,
            events,
        ));
        let abort = watcher.abort_handle();
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(watcher);

        Ok(TransactionHandle {
            tx_hash: format!("{:?}", tx_hash),
            events: rx,
            subscription: Subscription::new(move || {
                debug!("confirmation watcher for {:?} released", tx_hash);
                abort.abort();
            }),
        })
    }

    async fn verify(
        &self,
        fingerprint: &ContentFingerprint,
        caller_context: &str,
    ) -> Result<Option<Identity>> {
        let mut request = TransactionRequest::new()
            .to(self.registry.address())
            .data(self.registry.encode_verify(fingerprint)?);
        if let Some(from) = caller_address(caller_context) {
            request = request.from(from);
        }

        let output = self
            .provider
            .call(&request.into(), None)
            .await
            .map_err(|e| AnchorError::VerificationQuery(e.to_string()))?;

        Ok(self
            .registry
            .decode_verify(output)?
            .map(|owner| Identity::from_address(&self.settings.did_method, &format_address(owner))))
    }

    async fn disconnect(&mut self) -> Result<()> {
        let aborted = self.abort_watchers();
        debug!(
            "released connection to {} ({} watcher(s) stopped)",
            self.settings.endpoint, aborted
        );
        Ok(())
    }
}

impl Drop for EthereumConnection {
    fn drop(&mut self) {
        let aborted = self.abort_watchers();
        if aborted > 0 {
            debug!("dropped connection to {} with {} live watcher(s)", self.settings.endpoint, aborted);
        }
    }
}

/// Account address usable as the `from` of a read-only call.
///
/// The caller context may be an identity, a bare address, or (when the
/// verification URL carries no identity) the fingerprint itself, which is not
/// an address and is dropped.
fn caller_address(caller_context: &str) -> Option<Address> {
    let candidate = Identity::parse(caller_context)
        .map(|id| id.address().to_string())
        .unwrap_or_else(|| caller_context.to_string());
    candidate.parse().ok()
}

/// Follows a transaction from broadcast to finality.
///
/// Sends at most one `InBlock` and ends the stream after the first terminal
/// status (`Finalized`, `Rejected` or `Lost`).
async fn watch_confirmations(
    provider: Provider<Http>,
    tx_hash: H256,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<TxStatus>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    let mut included: Option<U64> = None;

    loop {
        ticker.tick().await;
        match included {
            None => match provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status == Some(U64::zero()) {
                        let _ = events.send(TxStatus::Rejected {
                            reason: "transaction reverted".into(),
                        });
                        return;
                    }
                    if let Some(block) = receipt.block_number {
                        included = Some(block);
                        let _ = events.send(TxStatus::InBlock { block: block.to_string() });
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("receipt poll for {:?} failed: {}", tx_hash, e);
                    let _ = events.send(TxStatus::Lost { reason: e.to_string() });
                    return;
                }
            },
            Some(block) => match provider.get_block(BlockNumber::Finalized).await {
                Ok(Some(finalized)) if finalized.number.map_or(false, |n| n >= block) => {
                    let _ = events.send(TxStatus::Finalized { block: block.to_string() });
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("finality poll for {:?} failed: {}", tx_hash, e);
                    let _ = events.send(TxStatus::Lost { reason: e.to_string() });
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::key_management::KeyWallet;
    use crate::wallet::WalletExtension;
    use mockito::{mock, Matcher, Mock};

    const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn rpc(method: &str, body: String) -> Mock {
        mock("POST", "/")
            .match_body(Matcher::PartialJsonString(format!(r#"{{"method":"{}"}}"#, method)))
            .with_header("content-type", "application/json")
            .with_body(body)
            .create()
    }

    fn rpc_result(method: &str, result: &str) -> Mock {
        rpc(method, format!(r#"{{"jsonrpc":"2.0","id":1,"result":{}}}"#, result))
    }

    fn rpc_error(method: &str, message: &str) -> Mock {
        rpc(
            method,
            format!(
                r#"{{"jsonrpc":"2.0","id":1,"error":{{"code":-32000,"message":"{}"}}}}"#,
                message
            ),
        )
    }

    fn tx_hash() -> String {
        format!("0x{}", "ab".repeat(32))
    }

    fn receipt(status: &str) -> String {
        format!(
            r#"{{"transactionHash":"{hash}","transactionIndex":"0x0","blockHash":"0x{block_hash}",
            "blockNumber":"0x5","from":"{from}","to":"{to}","cumulativeGasUsed":"0x5208",
            "gasUsed":"0x5208","contractAddress":null,"logs":[],"status":"{status}",
            "logsBloom":"0x{bloom}","type":"0x0","effectiveGasPrice":"0x3b9aca00"}}"#,
            hash = tx_hash(),
            block_hash = "cd".repeat(32),
            from = DEV_ADDRESS,
            to = CONTRACT,
            status = status,
            bloom = "00".repeat(256),
        )
    }

    fn finalized_block(number: &str) -> String {
        let zero = format!("0x{}", "00".repeat(32));
        format!(
            r#"{{"hash":"0x{hash}","parentHash":"{zero}","sha3Uncles":"{zero}",
            "miner":"0x{miner}","stateRoot":"{zero}","transactionsRoot":"{zero}",
            "receiptsRoot":"{zero}","number":"{number}","gasUsed":"0x0","gasLimit":"0x1c9c380",
            "extraData":"0x","logsBloom":"0x{bloom}","timestamp":"0x6553f100","difficulty":"0x0",
            "totalDifficulty":"0x0","sealFields":[],"uncles":[],"transactions":[],"size":"0x220",
            "mixHash":"{zero}","nonce":"0x0000000000000000","baseFeePerGas":"0x7"}}"#,
            hash = "ef".repeat(32),
            zero = zero,
            miner = "00".repeat(20),
            number = number,
            bloom = "00".repeat(256),
        )
    }

    async fn next_status(handle: &mut TransactionHandle) -> Option<TxStatus> {
        tokio::time::timeout(Duration::from_secs(5), handle.events.recv())
            .await
            .expect("status stream stalled")
    }

    async fn dev_signer() -> Arc<dyn TransactionSigner> {
        KeyWallet::from_keys(&[DEV_KEY], "")
            .unwrap()
            .signer_for(DEV_ADDRESS)
            .await
            .unwrap()
    }

    fn settings(endpoint: String) -> EthereumSettings {
        EthereumSettings {
            endpoint,
            gas_limit: TxParam::Auto,
            nonce: TxParam::Auto,
            poll_interval: Duration::from_millis(10),
            did_method: "w3bstitch".into(),
        }
    }

    fn fingerprint() -> ContentFingerprint {
        ContentFingerprint::from_hex("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad").unwrap()
    }

    #[test]
    fn test_caller_address_from_identity() {
        let addr = caller_address("did:w3bstitch:0x1111111111111111111111111111111111111111").unwrap();
        assert_eq!(addr, Address::from([0x11; 20]));
        // A fingerprint fallback is not an address
        assert!(caller_address("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad").is_none());
    }

    // Single test so the shared mock server is never used concurrently.
    #[tokio::test]
    async fn test_verify_and_anchor_against_rpc() {
        let _chain = mock("POST", "/")
            .match_body(Matcher::PartialJsonString(r#"{"method":"eth_chainId"}"#.into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x7a69"}"#)
            .create();

        let ledger = EthereumLedger::new(settings(mockito::server_url()), CONTRACT).unwrap();
        let mut conn = ledger.connect().await.unwrap();

        let unanchored = mock("POST", "/")
            .match_body(Matcher::PartialJsonString(r#"{"method":"eth_call"}"#.into()))
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"jsonrpc":"2.0","id":1,"result":"0x{}"}}"#, "0".repeat(64)))
            .create();
        assert_eq!(conn.verify(&fingerprint(), "did:w3bstitch:0x1111111111111111111111111111111111111111").await.unwrap(), None);
        drop(unanchored);

        let anchored = mock("POST", "/")
            .match_body(Matcher::PartialJsonString(r#"{"method":"eth_call"}"#.into()))
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"jsonrpc":"2.0","id":1,"result":"0x{}{}"}}"#,
                "0".repeat(24),
                "22".repeat(20)
            ))
            .create();
        let owner = conn.verify(&fingerprint(), fingerprint().as_str()).await.unwrap().unwrap();
        assert_eq!(owner.as_str(), format!("did:w3bstitch:0x{}", "22".repeat(20)));
        drop(anchored);

        let failing = mock("POST", "/")
            .match_body(Matcher::PartialJsonString(r#"{"method":"eth_call"}"#.into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"execution reverted"}}"#)
            .create();
        assert!(matches!(
            conn.verify(&fingerprint(), "").await,
            Err(AnchorError::VerificationQuery(_))
        ));
        drop(failing);

        // Anchoring: nonce, gas price and gas estimate come from the node.
        let _nonce = rpc_result("eth_getTransactionCount", r#""0x0""#);
        let _gas_price = rpc_result("eth_gasPrice", r#""0x3b9aca00""#);
        let _estimate = rpc_result("eth_estimateGas", r#""0xb411""#);

        // Included, then covered by the finalized tag.
        let sent = rpc_result("eth_sendRawTransaction", &format!(r#""{}""#, tx_hash()));
        let included = rpc_result("eth_getTransactionReceipt", &receipt("0x1"));
        let finalized = rpc_result("eth_getBlockByNumber", &finalized_block("0x5"));
        let mut handle = conn.anchor(&fingerprint(), DEV_ADDRESS, dev_signer().await).await.unwrap();
        assert_eq!(handle.tx_hash, tx_hash());
        assert_eq!(next_status(&mut handle).await, Some(TxStatus::InBlock { block: "5".into() }));
        assert_eq!(next_status(&mut handle).await, Some(TxStatus::Finalized { block: "5".into() }));
        assert_eq!(next_status(&mut handle).await, None);
        handle.subscription.unsubscribe();
        drop((included, finalized));

        // Reverted receipt.
        let reverted = rpc_result("eth_getTransactionReceipt", &receipt("0x0"));
        let mut handle = conn.anchor(&fingerprint(), DEV_ADDRESS, dev_signer().await).await.unwrap();
        assert_eq!(
            next_status(&mut handle).await,
            Some(TxStatus::Rejected { reason: "transaction reverted".into() })
        );
        assert_eq!(next_status(&mut handle).await, None);
        handle.subscription.unsubscribe();
        drop(reverted);

        // Receipt polling fails.
        let poll_failure = rpc_error("eth_getTransactionReceipt", "header not found");
        let mut handle = conn.anchor(&fingerprint(), DEV_ADDRESS, dev_signer().await).await.unwrap();
        assert!(matches!(next_status(&mut handle).await, Some(TxStatus::Lost { .. })));
        handle.subscription.unsubscribe();
        drop(poll_failure);
        drop(sent);

        // The node refuses the raw transaction outright.
        let refused = rpc_error("eth_sendRawTransaction", "insufficient funds for gas * price + value");
        let result = conn.anchor(&fingerprint(), DEV_ADDRESS, dev_signer().await).await;
        match result {
            Err(AnchorError::Dispatch(reason)) => assert!(reason.contains("insufficient funds")),
            Err(e) => panic!("expected dispatch error, got {}", e),
            Ok(_) => panic!("expected dispatch error, got a transaction"),
        }
        drop(refused);

        // Not an account address.
        let result = conn.anchor(&fingerprint(), "5F3s", dev_signer().await).await;
        assert!(matches!(result, Err(AnchorError::IdentityMismatch(_))));

        conn.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        let ledger = EthereumLedger::new(settings("http://127.0.0.1:1".into()), CONTRACT).unwrap();
        assert!(matches!(ledger.connect().await, Err(AnchorError::Connection(_))));
    }
}
