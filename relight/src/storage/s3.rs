//! S3-backed [`ObjectStore`].

use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    Client,
    config::{Builder as S3ConfigBuilder, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
};
use bytes::Bytes;
use tracing::{debug, instrument};

use super::{OUTPUT_CONTENT_TYPE, ObjectStore, StorageError, key_from_url, public_url};
use crate::config::StorageConfig;

#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    public_domain: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>, public_domain: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_domain: public_domain.into(),
        }
    }

    /// Build the SDK client from configuration.
    ///
    /// Static credentials are used only when both the key id and the secret are set; otherwise
    /// the SDK's default provider chain applies (environment, profile, instance metadata).
    pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        let bucket = config.bucket.clone().context("storage.bucket is not configured")?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(key_id, secret, None, None, "relight-config"));
        }
        let shared = loader.load().await;

        let mut builder = S3ConfigBuilder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint.as_str().trim_end_matches('/'));
        }

        Ok(Self::new(
            Client::from_conf(builder.build()),
            bucket,
            config.public_domain.clone(),
        ))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self), err)]
    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError> {
        let key = key_from_url(url)?;
        debug!(bucket = %self.bucket, key = %key, "Fetching object");

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound {
                        bucket: self.bucket.clone(),
                        key: key.clone(),
                    }
                } else {
                    StorageError::Get {
                        bucket: self.bucket.clone(),
                        key: key.clone(),
                        message: DisplayErrorContext(&e).to_string(),
                    }
                }
            })?;

        let body = output.body.collect().await.map_err(|e| StorageError::Get {
            bucket: self.bucket.clone(),
            key: key.clone(),
            message: e.to_string(),
        })?;
        let bytes = body.into_bytes();

        debug!(key = %key, size = bytes.len(), "Fetched object");
        Ok(bytes)
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()), err)]
    async fn store(&self, bytes: Bytes, bucket: &str, key: &str) -> Result<String, StorageError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(OUTPUT_CONTENT_TYPE)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Put {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let url = public_url(bucket, &self.public_domain, key);
        debug!(url = %url, "Stored object");
        Ok(url)
    }
}
