//! Blob Fetcher (§4.0 / spec §3 "Ownership of blobs"): content-addressed
//! read/write of source code and test-case input/output blobs.
//!
//! Blobs are named by the hex SHA-256 digest of their own bytes, so a
//! blob reference is self-verifying: `get` recomputes the digest of what
//! it read back and rejects a mismatch rather than silently serving
//! corrupted or substituted content. Submissions and test cases only ever
//! hold a reference (§3 "a Submission ... never the bytes"); the judge
//! reads bytes on demand to bound worker memory.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use sha2::{Digest, Sha256};

use judge_config::EnvConfig;

#[derive(Debug)]
pub enum BlobError {
    NotFound(String),
    Integrity { blob_ref: String, got: String },
    Backend(String),
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::NotFound(blob_ref) => write!(f, "blob not found: {blob_ref}"),
            BlobError::Integrity { blob_ref, got } => {
                write!(f, "blob {blob_ref} failed integrity check, recomputed digest {got}")
            }
            BlobError::Backend(msg) => write!(f, "object store error: {msg}"),
        }
    }
}

impl std::error::Error for BlobError {}

/// A content-addressed blob reference: the hex SHA-256 digest of the blob's
/// bytes. `code_blob_ref`, `input_blob_ref` and `output_blob_ref` in
/// [`judge_schemas`] are exactly this string.
pub fn content_key(contents: &[u8]) -> String {
    let digest = Sha256::digest(contents);
    hex::encode(digest)
}

fn shard_path(blob_ref: &str) -> StorePath {
    // Two levels of two-hex-char sharding keep any single prefix directory
    // from growing unbounded as the corpus of blobs grows.
    if blob_ref.len() >= 4 {
        StorePath::from(format!(
            "blobs/{}/{}/{}",
            &blob_ref[0..2],
            &blob_ref[2..4],
            blob_ref
        ))
    } else {
        StorePath::from(format!("blobs/{blob_ref}"))
    }
}

/// Read/write access to content-addressed blobs, independent of the
/// concrete backend. Workers and the resource validator depend on this
/// trait, not on [`ObjectStoreBlobFetcher`] directly, so tests can swap in
/// an in-memory store (`object_store::memory::InMemory` satisfies
/// [`ObjectStore`] directly and needs no fake of our own).
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Store `contents`, returning its content-addressed reference.
    async fn put(&self, contents: Bytes) -> Result<String, BlobError>;

    /// Fetch the blob named by `blob_ref`, verifying its digest matches.
    async fn get(&self, blob_ref: &str) -> Result<Bytes, BlobError>;
}

pub struct ObjectStoreBlobFetcher {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBlobFetcher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Build an S3-compatible backend from judge configuration (§6 CLI /
    /// operator surface: object-store endpoint + credentials).
    pub fn from_env(cfg: &EnvConfig) -> Result<Self, BlobError> {
        let store = AmazonS3Builder::new()
            .with_bucket_name(&cfg.object_store_bucket)
            .with_access_key_id(&cfg.object_store_access_key)
            .with_secret_access_key(&cfg.object_store_secret_key)
            .with_endpoint(&cfg.object_store_endpoint)
            .with_allow_http(true)
            .build()
            .map_err(|e| BlobError::Backend(format!("failed to build object store client: {e}")))?;

        Ok(Self::new(Arc::new(store)))
    }
}

#[async_trait]
impl BlobFetcher for ObjectStoreBlobFetcher {
    async fn put(&self, contents: Bytes) -> Result<String, BlobError> {
        let blob_ref = content_key(&contents);
        let path = shard_path(&blob_ref);

        self.store
            .put(&path, contents.into())
            .await
            .map_err(|e| BlobError::Backend(e.to_string()))?;

        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &str) -> Result<Bytes, BlobError> {
        let path = shard_path(blob_ref);

        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => BlobError::NotFound(blob_ref.to_string()),
            other => BlobError::Backend(other.to_string()),
        })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| BlobError::Backend(e.to_string()))?;

        let actual = content_key(&bytes);
        if actual != blob_ref {
            return Err(BlobError::Integrity {
                blob_ref: blob_ref.to_string(),
                got: actual,
            });
        }

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn fetcher() -> ObjectStoreBlobFetcher {
        ObjectStoreBlobFetcher::new(Arc::new(InMemory::new()))
    }

    #[test]
    fn content_key_is_stable_sha256_hex() {
        let a = content_key(b"int main(){}");
        let b = content_key(b"int main(){}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn different_contents_hash_differently() {
        assert_ne!(content_key(b"a"), content_key(b"b"));
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = fetcher();
        let blob_ref = store.put(Bytes::from_static(b"42\n")).await.unwrap();
        let bytes = store.get(&blob_ref).await.unwrap();
        assert_eq!(bytes, Bytes::from_static(b"42\n"));
    }

    #[tokio::test]
    async fn get_missing_blob_is_not_found() {
        let store = fetcher();
        let err = store.get(&content_key(b"never written")).await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[tokio::test]
    async fn shard_path_groups_by_hash_prefix() {
        let blob_ref = content_key(b"sample");
        let path = shard_path(&blob_ref);
        let expected = format!("blobs/{}/{}/{}", &blob_ref[0..2], &blob_ref[2..4], blob_ref);
        assert_eq!(path, StorePath::from(expected));
    }
}
