use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{http::HttpResponse, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Utc};
use muse_common::ids::validate_object_key;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{expires_at, ObjectMetadata, ObjectResult, ObjectStore, ObjectStoreError, PresignedUrl};
use crate::config::ObjectStoreConfig;

/// Error codes S3 (and MinIO) use for load shedding
const RETRYABLE_CODES: &[&str] = &[
    "SlowDown",
    "ServiceUnavailable",
    "RequestTimeout",
    "InternalError",
    "ThrottlingException",
];

fn map_sdk_error<E>(key: &str, err: SdkError<E, HttpResponse>) -> ObjectStoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = format!("{}: {}", key, DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            ObjectStoreError::Unavailable(message)
        }
        _ if status == Some(404) || matches!(err.code(), Some("NoSuchKey" | "NotFound")) => {
            ObjectStoreError::NotFound(key.to_string())
        }
        _ if err.code().is_some_and(|code| RETRYABLE_CODES.contains(&code))
            || status == Some(503) =>
        {
            ObjectStoreError::Unavailable(message)
        }
        _ => ObjectStoreError::Backend(message),
    }
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

fn presigning(ttl: Duration) -> ObjectResult<PresigningConfig> {
    PresigningConfig::expires_in(ttl)
        .map_err(|e| ObjectStoreError::Backend(format!("invalid presign ttl: {}", e)))
}

/// S3-compatible object store (AWS, MinIO)
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(config: &ObjectStoreConfig) -> Result<Self> {
        debug!("Initializing object store with config: {:?}", config);

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "muse-objects");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(config.region.clone()))
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };
        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!("Object store client initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> ObjectResult<PresignedUrl> {
        validate_object_key(key)?;
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning(ttl)?)
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        debug!("Presigned upload for s3://{}/{}", self.bucket, key);
        Ok(PresignedUrl {
            url: request.uri().to_string(),
            expires_at: expires_at(ttl),
        })
    }

    #[instrument(skip(self))]
    async fn presign_download(&self, key: &str, ttl: Duration) -> ObjectResult<PresignedUrl> {
        validate_object_key(key)?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning(ttl)?)
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        Ok(PresignedUrl {
            url: request.uri().to_string(),
            expires_at: expires_at(ttl),
        })
    }

    #[instrument(skip(self))]
    async fn head_object(&self, key: &str) -> ObjectResult<Option<ObjectMetadata>> {
        validate_object_key(key)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => Ok(Some(ObjectMetadata {
                key: key.to_string(),
                size: response.content_length().unwrap_or(0).max(0) as u64,
                content_type: response.content_type().map(|s| s.to_string()),
                last_modified: response.last_modified().and_then(to_chrono),
            })),
            Err(e) => match map_sdk_error(key, e) {
                ObjectStoreError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    #[instrument(skip(self))]
    async fn get_object(&self, key: &str) -> ObjectResult<Vec<u8>> {
        validate_object_key(key)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| ObjectStoreError::Unavailable(format!("{}: body read failed: {}", key, e)))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);
        Ok(data)
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) -> ObjectResult<()> {
        validate_object_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        info!("Stored s3://{}/{}", self.bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy_object(&self, source: &str, dest: &str) -> ObjectResult<()> {
        validate_object_key(source)?;
        validate_object_key(dest)?;
        let copy_source = format!("{}/{}", self.bucket, source);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(&copy_source)
            .key(dest)
            .send()
            .await
            .map_err(|e| map_sdk_error(source, e))?;

        info!(
            "Copied s3://{}/{} to s3://{}/{}",
            self.bucket, source, self.bucket, dest
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, key: &str) -> ObjectResult<()> {
        validate_object_key(key)?;
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {}
            Err(e) => match map_sdk_error(key, e) {
                ObjectStoreError::NotFound(_) => {}
                other => return Err(other),
            },
        }
        info!("Deleted s3://{}/{}", self.bucket, key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ObjectBackend;

    fn local_config() -> ObjectStoreConfig {
        ObjectStoreConfig::for_minio("http://localhost:9000", "muse-test")
    }

    #[tokio::test]
    async fn test_presign_upload_is_local() {
        let config = local_config();
        assert_eq!(config.backend, ObjectBackend::S3);
        let store = S3ObjectStore::new(&config).await.unwrap();
        assert_eq!(store.bucket(), "muse-test");

        let url = store
            .presign_upload("uploads/a/b/song.mp3", "audio/mpeg", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(url.url.starts_with("http://localhost:9000/muse-test/uploads/a/b/song.mp3"));
        assert!(url.url.contains("X-Amz-Expires=900"));
        assert!(url.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_presign_rejects_bad_keys() {
        let store = S3ObjectStore::new(&local_config()).await.unwrap();
        let err = store
            .presign_download("/etc/passwd", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::InvalidKey(_)));
    }
}
