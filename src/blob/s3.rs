//! S3-compatible storage backend
//!
//! Works against AWS S3, MinIO, and other S3-compatible services.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client, Config,
};
use std::time::Duration;

use super::StorageBackend;
use crate::error::{Error, Result};

/// S3 storage backend configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub prefix: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl S3Config {
    /// Load S3 configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: std::env::var("S3_ENDPOINT")
                .map_err(|_| Error::Configuration("S3_ENDPOINT not set".into()))?,
            bucket: std::env::var("S3_BUCKET")
                .map_err(|_| Error::Configuration("S3_BUCKET not set".into()))?,
            prefix: std::env::var("S3_PREFIX").unwrap_or_default(),
            access_key: std::env::var("S3_ACCESS_KEY")
                .map_err(|_| Error::Configuration("S3_ACCESS_KEY not set".into()))?,
            secret_key: std::env::var("S3_SECRET_KEY")
                .map_err(|_| Error::Configuration("S3_SECRET_KEY not set".into()))?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }

    /// Check if S3 is configured via environment variables
    pub fn is_configured() -> bool {
        std::env::var("S3_ENDPOINT").is_ok()
            && std::env::var("S3_BUCKET").is_ok()
            && std::env::var("S3_ACCESS_KEY").is_ok()
            && std::env::var("S3_SECRET_KEY").is_ok()
    }
}

pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    pub async fn new(config: S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "archway",
        );

        let s3_config = Config::builder()
            .behavior_version_latest()
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
            prefix: config.prefix,
        })
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        }
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn initialize(&self) -> Result<()> {
        self.health_check().await
    }

    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("put {key}: {e}")))?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("get {key}: {e}")))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| Error::Storage(format!("read body {key}: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("delete {key}: {e}")))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| Error::Storage(format!("list {prefix}: {e}")))?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    let stripped = key
                        .strip_prefix(&format!("{}/", self.prefix.trim_end_matches('/')))
                        .unwrap_or(key);
                    keys.push(stripped.to_string());
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("bucket unavailable: {e}")))?;
        Ok(())
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| Error::Storage(format!("presigning config: {e}")))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .presigned(presigning)
            .await
            .map_err(|e| Error::Storage(format!("presign {key}: {e}")))?;

        Ok(request.uri().to_string())
    }
}
