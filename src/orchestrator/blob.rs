//! The blob store boundary (spec.md §1: "out of scope, interfaces only").
//! The orchestrator never reads or writes object bytes — it only issues
//! presigned URLs against a `storage_key` the processor already wrote to.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Issue a time-bounded signed URL granting read access to `storage_key`.
    async fn presign(&self, storage_key: &str, ttl: Duration) -> Result<(String, DateTime<Utc>)>;
}

/// A presigned-URL issuer good enough to exercise the orchestrator's
/// finalize stage and refresh logic without a real object store. Produces a
/// deterministic, inspectable URL rather than talking to anything over the
/// network.
pub struct MockBlobStore {
    base_url: String,
}

impl MockBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn presign(&self, storage_key: &str, ttl: Duration) -> Result<(String, DateTime<Utc>)> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        let url = format!(
            "{}/{}?expires={}",
            self.base_url.trim_end_matches('/'),
            storage_key,
            expires_at.timestamp()
        );
        Ok((url, expires_at))
    }
}
