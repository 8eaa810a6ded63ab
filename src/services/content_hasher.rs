// src/services/content_hasher.rs
//! Credential fingerprinting service.
//!
//! Hashes the complete content of a selected credential file. There is no
//! streaming mode: the whole file is held in memory, which bounds usable file
//! size to available memory.
//!
//! Selections are versioned. Selecting a new file supersedes any computation
//! still running for an earlier one, and the stale result is discarded when
//! it arrives rather than overwriting the newer selection.

use crate::error::{AnchorError, Result};
use crate::models::credential::{ContentFingerprint, CredentialFile};
use crate::utils::crypto::hash_data;
use bytes::Bytes;
use log::{debug, info};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// The file currently selected and its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedCredential {
    pub name: String,
    pub hash: ContentFingerprint,
}

/// Ticket identifying one selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionTicket(u64);

#[derive(Default)]
pub struct ContentHasher {
    generation: AtomicU64,
    current: Mutex<Option<SelectedCredential>>,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a file completely into memory.
    ///
    /// # Errors
    /// Returns `AnchorError::Unknown` if the file cannot be read.
    pub async fn read_file(path: impl AsRef<Path>) -> Result<CredentialFile> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AnchorError::Unknown(format!("cannot read {}: {}", path.display(), e)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(CredentialFile::new(name, bytes))
    }

    /// Computes the fingerprint of `bytes` on the blocking pool.
    pub async fn fingerprint(bytes: Bytes) -> Result<ContentFingerprint> {
        tokio::task::spawn_blocking(move || ContentFingerprint::from_digest(hash_data(&bytes)))
            .await
            .map_err(|e| AnchorError::Unknown(format!("hashing task failed: {}", e)))
    }

    /// Starts a new selection, clearing the previous fingerprint.
    pub fn begin(&self) -> SelectionTicket {
        let mut current = self.lock();
        let ticket = SelectionTicket(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
        *current = None;
        ticket
    }

    /// Records the fingerprint for `ticket` if it is still the latest selection.
    ///
    /// # Returns
    /// `None` if a newer selection began meanwhile; the result is discarded.
    pub fn complete(
        &self,
        ticket: SelectionTicket,
        name: &str,
        hash: ContentFingerprint,
    ) -> Option<SelectedCredential> {
        let mut current = self.lock();
        // `begin` bumps the generation under the same lock.
        if self.generation.load(Ordering::SeqCst) != ticket.0 {
            debug!("discarding stale fingerprint for {}", name);
            return None;
        }
        let selected = SelectedCredential {
            name: name.to_string(),
            hash,
        };
        *current = Some(selected.clone());
        info!("selected {} ({})", selected.name, selected.hash);
        Some(selected)
    }

    /// Selects `file` and fingerprints it.
    ///
    /// # Returns
    /// - `Ok(Some(_))` with the new selection
    /// - `Ok(None)` if another selection superseded this one before hashing finished
    pub async fn select(&self, file: CredentialFile) -> Result<Option<SelectedCredential>> {
        let ticket = self.begin();
        let hash = Self::fingerprint(file.bytes).await?;
        Ok(self.complete(ticket, &file.name, hash))
    }

    pub fn current(&self) -> Option<SelectedCredential> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<SelectedCredential>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
