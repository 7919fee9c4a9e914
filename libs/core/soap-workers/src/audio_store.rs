//! Retrieval of the raw bytes behind a job's `audioBlobRef`.
//!
//! §6 describes the audio submission shape as a reference
//! (`audioBlobRef`) rather than inline bytes — the blob itself lives in
//! whatever storage the HTTP façade used to accept the upload. That
//! storage is unspecified by the source system, so this crate depends
//! only on the narrow trait below; callers wire in whatever backing store
//! they use (object storage, a temp-file directory, …).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct BlobNotFound(pub String);

impl std::fmt::Display for BlobNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "audio blob not found: {}", self.0)
    }
}

impl std::error::Error for BlobNotFound {}

#[async_trait]
pub trait AudioBlobStore: Send + Sync {
    async fn fetch(&self, blob_ref: &str) -> Result<Vec<u8>, BlobNotFound>;
}

/// In-memory blob store, used in tests and for local/dev deployments.
#[derive(Default)]
pub struct InMemoryAudioBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryAudioBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, blob_ref: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.write().unwrap().insert(blob_ref.into(), bytes);
    }
}

#[async_trait]
impl AudioBlobStore for InMemoryAudioBlobStore {
    async fn fetch(&self, blob_ref: &str) -> Result<Vec<u8>, BlobNotFound> {
        self.blobs
            .read()
            .unwrap()
            .get(blob_ref)
            .cloned()
            .ok_or_else(|| BlobNotFound(blob_ref.to_string()))
    }
}
