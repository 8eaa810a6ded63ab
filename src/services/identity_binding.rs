// src/services/identity_binding.rs
//! Session identity binding.
//!
//! Holds the single active [`Identity`] for a session. Consumers receive the
//! binding by injection; session storage mirrors `bind`/`clear` and is never
//! consulted as an independent source of truth after start-up.

use crate::error::{AnchorError, Result};
use crate::models::did::Identity;
use crate::wallet::session_storage::{SessionStore, IDENTITY_KEY};
use crate::wallet::WalletExtension;
use log::{info, warn};
use std::sync::{Arc, PoisonError, RwLock};

pub struct IdentityBinding {
    wallet: Arc<dyn WalletExtension>,
    store: Arc<dyn SessionStore>,
    application_name: String,
    did_method: String,
    active: RwLock<Option<Identity>>,
}

impl IdentityBinding {
    /// Creates a binding, restoring an identity left in session storage.
    ///
    /// # Arguments
    /// * `wallet` - Wallet capability used by `connect`
    /// * `store` - Session-scoped storage mirroring the active identity
    /// * `application_name` - Name presented to the wallet on `enable`
    /// * `did_method` - Placeholder method for derived identities
    pub fn new(
        wallet: Arc<dyn WalletExtension>,
        store: Arc<dyn SessionStore>,
        application_name: &str,
        did_method: &str,
    ) -> Self {
        let restored = store.get(IDENTITY_KEY).and_then(|raw| {
            let parsed = Identity::parse(&raw);
            if parsed.is_none() {
                warn!("ignoring malformed identity in session storage: {:?}", raw);
            }
            parsed
        });
        Self {
            wallet,
            store,
            application_name: application_name.to_string(),
            did_method: did_method.to_string(),
            active: RwLock::new(restored),
        }
    }

    /// Connects the wallet and binds the identity of its first account.
    ///
    /// # Errors
    /// `AnchorError::WalletConnection` if no provider responds or no account
    /// is returned. The previously bound identity is left untouched.
    pub async fn connect(&self) -> Result<Identity> {
        self.wallet.enable(&self.application_name).await?;
        let accounts = self.wallet.list_accounts().await?;
        let account = accounts
            .first()
            .ok_or_else(|| AnchorError::WalletConnection("wallet returned no accounts".into()))?;

        let identity = Identity::from_address(&self.did_method, &account.address);
        self.bind(identity.clone());
        Ok(identity)
    }

    /// Replaces the active identity.
    pub fn bind(&self, identity: Identity) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        self.store.set(IDENTITY_KEY, identity.as_str());
        info!("bound identity {}", identity);
        *active = Some(identity);
    }

    /// Clears the active identity and erases it from session storage.
    pub fn disconnect(&self) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        self.store.remove(IDENTITY_KEY);
        if let Some(previous) = active.take() {
            info!("cleared identity {}", previous);
        }
    }

    pub fn current(&self) -> Option<Identity> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
