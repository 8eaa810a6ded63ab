// src/services/api_server.rs
//! API server for credential anchoring and verification.
//!
//! Endpoints:
//! - Wallet session: connect, disconnect, current identity
//! - Credential selection and fingerprinting
//! - Anchoring a fingerprint and following its progress
//! - Verification of a scanned code's parameters

use crate::blockchain::Ledger;
use crate::error::AnchorError;
use crate::models::credential::{ContentFingerprint, CredentialFile};
use crate::models::did::Identity;
use crate::services::anchor_orchestrator::{AnchorOrchestrator, AnchorProgress, AnchorSlot, AnchorState};
use crate::services::content_hasher::ContentHasher;
use crate::services::identity_binding::IdentityBinding;
use crate::services::verification_code::VerificationCodeEncoder;
use crate::services::verification_query::{parse_verification_url, VerificationQuery};
use crate::wallet::WalletExtension;
use axum::{
    body::Bytes,
    extract::{Json, Query, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

/// Request header carrying the selected file's name.
pub const FILE_NAME_HEADER: &str = "x-file-name";

/// Request payload for anchoring; `hash` defaults to the current selection
#[derive(Debug, Default, Deserialize)]
struct AnchorRequest {
    hash: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnchorParams {
    #[serde(default)]
    wait: bool,
}

/// Response carrying the session identity
#[derive(Serialize)]
struct IdentityResponse {
    did: Option<Identity>,
}

impl AnchorError {
    fn status_code(&self) -> StatusCode {
        match self {
            AnchorError::NotLoggedIn => StatusCode::UNAUTHORIZED,
            AnchorError::IdentityMismatch(_) => StatusCode::FORBIDDEN,
            AnchorError::WalletConnection(_) => StatusCode::SERVICE_UNAVAILABLE,
            AnchorError::Dispatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AnchorError::Connection(_) | AnchorError::VerificationQuery(_) => StatusCode::BAD_GATEWAY,
            AnchorError::InvalidFingerprint(_) => StatusCode::BAD_REQUEST,
            AnchorError::Busy => StatusCode::CONFLICT,
            AnchorError::Config(_) | AnchorError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AnchorError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// API server state containing all service dependencies
#[derive(Clone)]
pub struct ApiServer {
    identity: Arc<IdentityBinding>,
    hasher: Arc<ContentHasher>,
    ledger: Arc<dyn Ledger>,
    wallet: Arc<dyn WalletExtension>,
    encoder: VerificationCodeEncoder,
    application_name: String,
    slot: Arc<AnchorSlot>,
    /// Progress of the most recent anchor attempt
    latest: Arc<RwLock<Option<watch::Receiver<AnchorProgress>>>>,
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `identity` - Session identity binding
    /// * `ledger` - Ledger capability shared by anchor and verify paths
    /// * `wallet` - Wallet capability used for signing
    /// * `encoder` - Verification code encoder
    /// * `application_name` - Name presented to the wallet
    pub fn new(
        identity: Arc<IdentityBinding>,
        ledger: Arc<dyn Ledger>,
        wallet: Arc<dyn WalletExtension>,
        encoder: VerificationCodeEncoder,
        application_name: &str,
    ) -> Self {
        ApiServer {
            identity,
            hasher: Arc::new(ContentHasher::new()),
            ledger,
            wallet,
            encoder,
            application_name: application_name.to_string(),
            slot: Arc::new(AnchorSlot::new()),
            latest: Arc::new(RwLock::new(None)),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/wallet/connect", post(Self::wallet_connect_handler))
            .route("/wallet/disconnect", post(Self::wallet_disconnect_handler))
            .route("/wallet/identity", get(Self::wallet_identity_handler))
            .route("/credential/fingerprint", post(Self::fingerprint_handler))
            .route("/credential/anchor", post(Self::anchor_handler))
            .route("/credential/anchor/status", get(Self::anchor_status_handler))
            .route("/verify", get(Self::verify_handler))
            .layer(CorsLayer::permissive())
            .with_state(Arc::new(self.clone()))
    }

    /// Starts the API server and begins listening for requests
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:3000")
    pub async fn run(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on http://{}", addr);
        axum::serve(listener, self.router()).await
    }

    // =====================
    // Wallet Session Handlers
    // =====================

    /// Connects the wallet and binds its first account
    ///
    /// # Endpoint
    /// POST /wallet/connect
    async fn wallet_connect_handler(State(state): State<Arc<ApiServer>>) -> Response {
        match state.identity.connect().await {
            Ok(did) => (StatusCode::OK, Json(IdentityResponse { did: Some(did) })).into_response(),
            Err(e) => e.into_response(),
        }
    }

    /// POST /wallet/disconnect
    async fn wallet_disconnect_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        state.identity.disconnect();
        Json(IdentityResponse { did: None })
    }

    /// GET /wallet/identity
    async fn wallet_identity_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        Json(IdentityResponse { did: state.identity.current() })
    }

    // =====================
    // Credential Handlers
    // =====================

    /// Selects a credential file and fingerprints it
    ///
    /// # Endpoint
    /// POST /credential/fingerprint
    ///
    /// # Request Body
    /// Raw file content; the name comes from the `x-file-name` header
    ///
    /// # Responses
    /// - 200 OK: `{name, hash}`
    /// - 409 Conflict: a newer selection superseded this one
    async fn fingerprint_handler(
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let name = headers
            .get(FILE_NAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("credential")
            .to_string();

        match state.hasher.select(CredentialFile::new(name, body)).await {
            Ok(Some(selected)) => (StatusCode::OK, Json(selected)).into_response(),
            Ok(None) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": "superseded by a newer selection" })),
            )
                .into_response(),
            Err(e) => e.into_response(),
        }
    }

    /// Anchors a fingerprint for the bound identity
    ///
    /// # Endpoint
    /// POST /credential/anchor[?wait=true]
    ///
    /// # Request Body
    /// Optional JSON `{hash}`; without it the current selection is anchored
    ///
    /// # Responses
    /// - 202 Accepted: attempt started, returns the progress snapshot
    /// - 200 OK: with `wait`, the finalized snapshot
    /// - 409 Conflict: another attempt is in progress
    /// - 4xx/5xx: with `wait`, the failure of the attempt
    async fn anchor_handler(
        State(state): State<Arc<ApiServer>>,
        Query(params): Query<AnchorParams>,
        body: Bytes,
    ) -> Response {
        let request: AnchorRequest = if body.is_empty() {
            AnchorRequest::default()
        } else {
            match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(e) => {
                    return AnchorError::InvalidFingerprint(format!("malformed request: {}", e))
                        .into_response()
                }
            }
        };

        let fingerprint = match request.hash {
            Some(hash) => match ContentFingerprint::from_hex(&hash) {
                Ok(fingerprint) => fingerprint,
                Err(e) => return e.into_response(),
            },
            None => match state.hasher.current() {
                Some(selected) => selected.hash,
                None => {
                    return AnchorError::InvalidFingerprint("no credential selected".into())
                        .into_response()
                }
            },
        };

        let guard = match state.slot.try_begin() {
            Ok(guard) => guard,
            Err(e) => {
                warn!("anchor request for {} refused: {}", fingerprint, e);
                return e.into_response();
            }
        };

        let orchestrator = AnchorOrchestrator::new(
            state.ledger.clone(),
            state.wallet.clone(),
            state.encoder.clone(),
            &state.application_name,
        );
        let mut progress = orchestrator.subscribe();
        *state.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(progress.clone());

        let identity = state.identity.current();
        orchestrator.stage(&fingerprint, identity.as_ref());
        tokio::spawn(async move {
            let _guard = guard;
            if let Ok(outcome) = orchestrator.run(&fingerprint, identity.as_ref()).await {
                info!("anchored in {}: {}", outcome.block, outcome.code.url);
            }
        });

        if !params.wait {
            let snapshot = progress.borrow().clone();
            return (StatusCode::ACCEPTED, Json(snapshot)).into_response();
        }

        let snapshot = AnchorOrchestrator::wait_terminal(&mut progress).await;
        match (snapshot.state, snapshot.failure.clone()) {
            (AnchorState::Finalized, _) => (StatusCode::OK, Json(snapshot)).into_response(),
            (_, Some(e)) => (e.status_code(), Json(snapshot)).into_response(),
            (_, None) => (StatusCode::INTERNAL_SERVER_ERROR, Json(snapshot)).into_response(),
        }
    }

    /// GET /credential/anchor/status
    async fn anchor_status_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        let snapshot = state
            .latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|progress| progress.borrow().clone())
            .unwrap_or_else(AnchorProgress::idle);
        Json(snapshot)
    }

    // =====================
    // Verification Handlers
    // =====================

    /// Verifies a scanned code's parameters against the ledger
    ///
    /// # Endpoint
    /// GET /verify?did=<identity>&hash=<fingerprint>
    ///
    /// # Responses
    /// - 200 OK: Verification report (`idle`, `match` or `no-match`)
    /// - 502 Bad Gateway: the query could not be performed
    async fn verify_handler(
        State(state): State<Arc<ApiServer>>,
        RawQuery(query): RawQuery,
    ) -> Response {
        let request = parse_verification_url(&format!("?{}", query.unwrap_or_default()));
        let viewer = state.identity.current();
        match VerificationQuery::new(state.ledger.clone())
            .run(request, viewer.as_ref())
            .await
        {
            Ok(report) => (StatusCode::OK, Json(report)).into_response(),
            Err(e) => e.into_response(),
        }
    }
}
