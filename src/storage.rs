use async_trait::async_trait;
use log::{error, info, warn};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaStoreError {
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// A stored asset: the stable public URL clients embed, and the opaque id
/// used for later deletion.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub url: String,
    pub public_id: String,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, bytes: &[u8], mime: &str) -> Result<MediaAsset, MediaStoreError>;
    async fn delete(&self, public_id: &str) -> Result<(), MediaStoreError>;
}

// ---------------- S3 Implementation (MinIO compatible) ----------------
pub struct S3MediaStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
    public_base: String,
}

impl S3MediaStore {
    pub async fn new() -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "pinboard-media".into());
        let endpoint = std::env::var("S3_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let access = std::env::var("S3_ACCESS_KEY").unwrap_or_default();
        let secret = std::env::var("S3_SECRET_KEY").unwrap_or_default();
        // URL base served to clients; defaults to path-style on the endpoint
        let public_base = std::env::var("MEDIA_PUBLIC_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));
        loader = loader.endpoint_url(endpoint);
        if !access.is_empty() && !secret.is_empty() {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // Path-style addressing (required for most MinIO/local endpoints without wildcard DNS)
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("Initialized S3/MinIO media client (path-style addressing enabled)");

        // Ensure bucket exists (create if missing)
        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}' (will attempt create): {e:?}");
            let mut attempt = 0u32;
            let max_attempts = 8;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e2) => {
                        if attempt >= max_attempts {
                            error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e2:?}");
                            return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e2}"));
                        } else {
                            let backoff_ms = 200 * attempt.pow(2); // quadratic backoff
                            warn!("create_bucket attempt {attempt} failed for '{bucket}': {e2:?} (retrying in {backoff_ms}ms)");
                            tokio::time::sleep(std::time::Duration::from_millis(backoff_ms as u64))
                                .await;
                        }
                    }
                }
            }
        }

        Ok(Self {
            bucket,
            client,
            prefix: "pins".into(),
            public_base,
        })
    }

    fn key_for(&self, hash: &str) -> String {
        format!("{}/{}/{}", self.prefix, &hash[0..2], hash)
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn upload(&self, bytes: &[u8], mime: &str) -> Result<MediaAsset, MediaStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let hash = format!("{:x}", Sha256::digest(bytes));
        let key = self.key_for(&hash);
        // content-addressed: re-uploading identical bytes is idempotent
        if self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .is_ok()
        {
            return Ok(MediaAsset { url: self.url_for(&key), public_id: key });
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!(
                "put_object failed key={key} bucket={} err={:?}",
                self.bucket, e
            );
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing or not yet propagated)"
            } else if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(MediaStoreError::Other(format!("{e}{hint}")));
        }
        Ok(MediaAsset { url: self.url_for(&key), public_id: key })
    }

    async fn delete(&self, public_id: &str) -> Result<(), MediaStoreError> {
        // checked delete: the caller surfaces non-success distinctly, so an
        // unknown asset must not look like a successful removal
        if self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(public_id)
            .send()
            .await
            .is_err()
        {
            return Err(MediaStoreError::NotFound);
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(public_id)
            .send()
            .await
            .map_err(|e| {
                error!("delete_object failed key={public_id} err={e:?}");
                MediaStoreError::Other(e.to_string())
            })?;
        Ok(())
    }
}

// Factory helper used in main (S3-only; panic early if misconfigured)
pub async fn build_media_store() -> Arc<dyn MediaStore> {
    match S3MediaStore::new().await {
        Ok(store) => Arc::new(store),
        Err(e) => panic!("Failed to initialize S3 media store: {e}"),
    }
}
