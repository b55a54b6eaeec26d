//! Blob storage for input assets and rendered results.
//!
//! Inputs are plain HTTPS URLs and are fetched with [`reqwest`]. Results
//! go to Supabase Storage through its S3-compatible endpoint with
//! [`aws_sdk_s3`]; the public URL is derived from the bucket's public
//! base URL.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use looks_core::types::DbId;

/// Timeout for a single input download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Content type of every rendered result.
pub const RESULT_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Download of {url} returned HTTP {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("Download of {url} returned an empty body")]
    EmptyBody { url: String },

    #[error("Upload of {key} failed: {message}")]
    Upload { key: String, message: String },
}

/// Where assets come from and results go.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Fetch an input asset by URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError>;

    /// Store a result under `key` and return its public URL.
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// Object key for a rendered result:
/// `{user_id}/tryons/tryon_{user_id}_{job_id}_{unix}.jpg`.
pub fn result_key(user_id: DbId, job_id: DbId, unix_secs: i64) -> String {
    format!("{user_id}/tryons/tryon_{user_id}_{job_id}_{unix_secs}.jpg")
}

/// `{base}/{bucket}/{key}` with no doubled slashes at the joins.
pub fn public_url(public_base_url: &str, bucket: &str, key: &str) -> String {
    format!(
        "{}/{}/{}",
        public_base_url.trim_end_matches('/'),
        bucket.trim_matches('/'),
        key.trim_start_matches('/')
    )
}

// ---------------------------------------------------------------------------
// Supabase Storage (S3 API)
// ---------------------------------------------------------------------------

/// Connection settings for the S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// e.g. `https://<project>.supabase.co/storage/v1/object/public`.
    pub public_base_url: String,
}

pub struct SupabaseStorage {
    http: reqwest::Client,
    s3: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl SupabaseStorage {
    pub async fn connect(config: &StorageConfig) -> Self {
        let credentials = aws_credential_types::Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "looks-worker",
        );
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Self {
            http: reqwest::Client::new(),
            s3: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }
}

#[async_trait]
impl AssetStore for SupabaseStorage {
    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|source| StorageError::Download {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::DownloadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| StorageError::Download {
                url: url.to_string(),
                source,
            })?;
        if bytes.is_empty() {
            return Err(StorageError::EmptyBody {
                url: url.to_string(),
            });
        }
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let size = bytes.len();
        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: aws_sdk_s3::error::DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!(bucket = %self.bucket, key, size, "Result uploaded");
        Ok(public_url(&self.public_base_url, &self.bucket, key))
    }
}
