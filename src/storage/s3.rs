use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use super::{validate_key, ObjectStore};
use crate::error::StorageError;

/// Connection settings for an S3-compatible bucket (AWS, Alibaba OSS, R2, MinIO).
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
    /// Public prefix for returned locators. Defaults to `https://{bucket}.{endpoint host}`.
    pub public_base_url: Option<String>,
}

impl S3Config {
    /// Returns `Ok(None)` when no endpoint is configured at all.
    pub fn from_env() -> Result<Option<Self>, StorageError> {
        let Ok(endpoint_url) = std::env::var("S3_ENDPOINT_URL") else {
            return Ok(None);
        };

        Ok(Some(Self {
            endpoint_url,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::Config("S3_ACCESS_KEY_ID not set".to_string()))?,
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::Config("S3_SECRET_ACCESS_KEY not set".to_string()))?,
            bucket: std::env::var("S3_BUCKET")
                .map_err(|_| StorageError::Config("S3_BUCKET not set".to_string()))?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_base_url: std::env::var("S3_PUBLIC_BASE_URL").ok(),
        }))
    }

    fn public_base(&self) -> Result<Url, StorageError> {
        let base = match &self.public_base_url {
            Some(base) => base.clone(),
            None => {
                let endpoint = Url::parse(&self.endpoint_url)
                    .map_err(|e| StorageError::Config(format!("invalid endpoint URL: {}", e)))?;
                let host = endpoint
                    .host_str()
                    .ok_or_else(|| StorageError::Config("endpoint URL has no host".to_string()))?;
                format!("https://{}.{}", self.bucket, host)
            }
        };

        let base = format!("{}/", base.trim_end_matches('/'));
        Url::parse(&base).map_err(|e| StorageError::Config(format!("invalid public base URL: {}", e)))
    }
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    public_base: Url,
}

impl S3Store {
    pub fn new(config: S3Config) -> Result<Self, StorageError> {
        let public_base = config.public_base()?;
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "brand-video",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket,
            public_base,
        })
    }

    pub fn locator(&self, name: &str) -> Result<Url, StorageError> {
        locator(&self.public_base, name)
    }
}

fn locator(base: &Url, name: &str) -> Result<Url, StorageError> {
    base.join(name)
        .map_err(|e| StorageError::Upload(format!("cannot build locator for '{}': {}", name, e)))
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<Url, StorageError> {
        validate_key(name)?;
        debug!(key = name, bytes = bytes.len(), bucket = %self.bucket, "uploading object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .body(ByteStream::from(bytes))
            .content_type(content_type_for(name))
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        let url = self.locator(name)?;
        info!(key = name, url = %url, "uploaded object");
        Ok(url)
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("mp4") => "video/mp4",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}
