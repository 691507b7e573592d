/*!
Amazon S3 remote store.

Uploads artifacts as objects using the official AWS SDK. Wrap it in
[`BlockingRemoteStore`](super::BlockingRemoteStore) to hand it to the
pipeline.
*/

use aws_config::SdkConfig;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, error, info};

use super::AsyncRemoteStore;
use crate::{Result, SatStoreError};

/// Amazon S3 remote store
///
/// # Authentication
/// Uses the standard AWS credential provider chain:
/// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN)
/// 2. AWS credentials file (~/.aws/credentials)
/// 3. IAM roles for EC2 instances / ECS task roles
///
/// # Example
/// ```rust,no_run
/// use satstore_core::storage::{BlockingRemoteStore, S3RemoteStore};
///
/// # async fn build() -> satstore_core::Result<()> {
/// let store = BlockingRemoteStore::new(S3RemoteStore::from_env().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3RemoteStore {
    client: S3Client,
}

impl S3RemoteStore {
    /// Create a store from the ambient AWS configuration
    ///
    /// # Errors
    /// `SatStoreError::Configuration` if no credentials provider is available
    pub async fn from_env() -> Result<Self> {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;

        if sdk_config.credentials_provider().is_none() {
            return Err(SatStoreError::configuration(
                "AWS credentials not found. Please set AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, and AWS_REGION environment variables",
            ));
        }

        info!("Initialized S3 remote store");
        Ok(Self::with_config(&sdk_config))
    }

    /// Create a store with explicit AWS configuration
    pub fn with_config(config: &SdkConfig) -> Self {
        Self {
            client: S3Client::new(config),
        }
    }
}

#[async_trait]
impl AsyncRemoteStore for S3RemoteStore {
    async fn upload(&self, local_file: &Path, bucket: &str, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local_file).await.map_err(|e| {
            SatStoreError::upload(
                key,
                format!("failed to open {}: {}", local_file.display(), e),
                false,
            )
        })?;

        debug!(bucket = %bucket, key = %key, "Starting S3 put_object operation");

        let result = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type_for(key))
            .body(body)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(uri = %format!("s3://{bucket}/{key}"), "Uploaded artifact to S3");
                Ok(())
            }
            Err(e) => {
                let mapped = map_s3_error("put_object", e, key);
                error!(bucket = %bucket, key = %key, error = ?mapped, "Failed to upload artifact to S3");
                Err(mapped)
            }
        }
    }

    fn scheme(&self) -> &'static str {
        "s3"
    }
}

fn content_type_for(key: &str) -> &'static str {
    match Path::new(key).extension().and_then(|e| e.to_str()) {
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Map AWS SDK errors to upload errors, flagging the retryable ones
fn map_s3_error<E: ProvideErrorMetadata + std::fmt::Debug>(
    op: &str,
    error: aws_sdk_s3::error::SdkError<E>,
    key: &str,
) -> SatStoreError {
    use aws_sdk_s3::error::SdkError;

    match &error {
        SdkError::DispatchFailure(dispatch_err) => SatStoreError::upload(
            key,
            format!("S3 {op} request failed to dispatch: {dispatch_err:?}"),
            true,
        ),
        SdkError::TimeoutError(_) => {
            SatStoreError::upload(key, format!("S3 {op} request timed out"), true)
        }
        SdkError::ResponseError(response_err) => SatStoreError::upload(
            key,
            format!("S3 {op} response error: {response_err:?}"),
            true,
        ),
        SdkError::ServiceError(service_err) => match service_err.err().code() {
            Some("NoSuchBucket") => SatStoreError::upload(key, "S3 bucket not found", false),
            Some("AccessDenied") | Some("Forbidden") => SatStoreError::upload(
                key,
                "Access denied to S3 (check credentials and permissions)",
                false,
            ),
            Some("InvalidBucketName") => {
                SatStoreError::upload(key, "Invalid S3 bucket name", false)
            }
            Some(code @ ("InternalError" | "SlowDown" | "ServiceUnavailable" | "RequestTimeout")) => {
                SatStoreError::upload(key, format!("S3 service error ({code})"), true)
            }
            Some(code) => SatStoreError::upload(
                key,
                format!(
                    "S3 service error ({}): {}",
                    code,
                    service_err.err().message().unwrap_or("Unknown error")
                ),
                false,
            ),
            None => SatStoreError::upload(key, format!("S3 {op} service error: {service_err:?}"), false),
        },
        _ => SatStoreError::upload(key, format!("S3 {op} error: {error}"), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satstore_retry::RetryableError;

    #[test]
    fn test_timeout_is_transient() {
        use aws_sdk_s3::operation::put_object::PutObjectError;
        use aws_sdk_s3::error::SdkError;

        let timeout: SdkError<PutObjectError> = SdkError::timeout_error("deadline elapsed");
        let mapped = map_s3_error("put_object", timeout, "base/a.tif");

        assert!(mapped.is_transient());
        assert!(mapped.to_string().contains("timed out"));
        assert!(mapped.to_string().contains("base/a.tif"));
    }

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type_for("S2MPC/2024/tiff/x.tif"), "image/tiff");
        assert_eq!(content_type_for("S2MPC/2024/npy/x.npy"), "application/octet-stream");
    }
}
