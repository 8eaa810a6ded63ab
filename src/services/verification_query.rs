// src/services/verification_query.rs
//! Verification query service.
//!
//! Reconciles the parameters of a scanned verification URL with ledger
//! state. A fingerprint that was never anchored is a `no-match` result; a
//! query that could not be performed is an error. The two are never
//! conflated.

use crate::blockchain::Ledger;
use crate::error::{AnchorError, Result};
use crate::models::credential::ContentFingerprint;
use crate::models::did::Identity;
use crate::models::verification::{
    VerificationReport, VerificationRequest, VerificationResult, VerificationStatus,
};
use log::{info, warn};
use std::sync::Arc;
use url::Url;

/// Extracts `did` and `hash` from a verification URL.
///
/// Accepts an absolute URL, a path with query (`/verify?...`) or a bare query
/// string. Missing parameters, and input that cannot be parsed at all, yield
/// empty strings. Repeated parameters resolve to their first occurrence.
pub fn parse_verification_url(raw: &str) -> VerificationRequest {
    let parsed = Url::parse(raw).or_else(|_| {
        let base = Url::parse("http://localhost/verify")?;
        if raw.starts_with('?') || raw.starts_with('/') {
            base.join(raw)
        } else {
            base.join(&format!("?{}", raw))
        }
    });
    let Ok(url) = parsed else {
        return VerificationRequest::default();
    };

    let param = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    };
    VerificationRequest {
        did: param("did"),
        hash: param("hash"),
    }
}

/// True when a viewer is bound and differs from the code's claimed identity.
fn viewer_mismatch(viewer: Option<&Identity>, did: &str) -> bool {
    match viewer {
        Some(viewer) => !did.is_empty() && viewer.as_str() != did,
        None => false,
    }
}

/// Read-side reconciliation against the ledger.
pub struct VerificationQuery {
    ledger: Arc<dyn Ledger>,
}

impl VerificationQuery {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Parses `url` and runs the query for it.
    pub async fn verify_url(&self, url: &str, viewer: Option<&Identity>) -> Result<VerificationReport> {
        self.run(parse_verification_url(url), viewer).await
    }

    /// Checks `request` against the ledger.
    ///
    /// # Arguments
    /// * `request` - Parameters from the verification URL
    /// * `viewer` - Identity bound in the viewer's own session, if any
    ///
    /// # Returns
    /// - `Idle` without touching the ledger when `hash` is empty
    /// - `Match` with the recorded owner
    /// - `NoMatch` when nothing is recorded for the fingerprint
    ///
    /// # Errors
    /// `AnchorError::VerificationQuery` if the ledger cannot be reached or
    /// the query fails, or the fingerprint is malformed.
    pub async fn run(&self, request: VerificationRequest, viewer: Option<&Identity>) -> Result<VerificationReport> {
        let viewer_mismatch = viewer_mismatch(viewer, &request.did);
        if viewer_mismatch {
            warn!("viewer identity differs from verification code identity {}", request.did);
        }

        if request.hash.is_empty() {
            return Ok(VerificationReport {
                request,
                result: VerificationResult::idle(),
                viewer_mismatch,
            });
        }

        let fingerprint = ContentFingerprint::from_hex(&request.hash)
            .map_err(|e| AnchorError::VerificationQuery(e.to_string()))?;

        // With no identity in the URL the fingerprint stands in as caller
        // context; the read-only call never uses it for authorization.
        let caller_context = if request.did.is_empty() {
            request.hash.as_str()
        } else {
            request.did.as_str()
        };

        let mut connection = self.ledger.connect().await.map_err(query_error)?;
        let outcome = connection.verify(&fingerprint, caller_context).await;
        if let Err(e) = connection.disconnect().await {
            warn!("failed to release verification connection: {}", e);
        }

        let result = VerificationResult::from_owner(outcome.map_err(query_error)?);
        match result.status {
            VerificationStatus::Match => info!(
                "{} verified, owner {}",
                fingerprint,
                result.owner.as_ref().map(Identity::as_str).unwrap_or_default()
            ),
            _ => info!("{} not anchored", fingerprint),
        }

        Ok(VerificationReport {
            request,
            result,
            viewer_mismatch,
        })
    }
}

fn query_error(e: AnchorError) -> AnchorError {
    match e {
        AnchorError::VerificationQuery(_) => e,
        other => AnchorError::VerificationQuery(other.to_string()),
    }
}
