//! Object storage access.
//!
//! Source images are referenced by URL but always read from the configured bucket: only the
//! path component of the URL is used as the object key. Results are written back under a
//! generated key and addressed by a virtual-hosted style public URL.

pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

pub use s3::S3ObjectStore;

/// Content type attached to every stored result.
pub const OUTPUT_CONTENT_TYPE: &str = "image/png";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid object URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("object '{key}' not found in bucket '{bucket}'")]
    NotFound { bucket: String, key: String },

    #[error("failed to read '{key}' from bucket '{bucket}': {message}")]
    Get { bucket: String, key: String, message: String },

    #[error("failed to write '{key}' to bucket '{bucket}': {message}")]
    Put { bucket: String, key: String, message: String },
}

/// Byte-level access to the bucket holding source images and results.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the whole object addressed by `url` into memory.
    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError>;

    /// Write `bytes` under `bucket`/`key` and return the object's public URL.
    async fn store(&self, bytes: Bytes, bucket: &str, key: &str) -> Result<String, StorageError>;
}

/// Object key for an image URL: the path with its leading slash removed. Host and query are
/// ignored.
pub fn key_from_url(url: &str) -> Result<String, StorageError> {
    let parsed = Url::parse(url).map_err(|e| StorageError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let key = parsed.path().trim_start_matches('/');
    if key.is_empty() {
        return Err(StorageError::InvalidUrl {
            url: url.to_string(),
            reason: "URL has no object path".to_string(),
        });
    }

    Ok(key.to_string())
}

pub fn public_url(bucket: &str, domain: &str, key: &str) -> String {
    format!("https://{bucket}.{domain}/{key}")
}
