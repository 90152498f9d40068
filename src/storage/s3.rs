use super::traits::{Storage, StorageError};
use crate::config::types::S3StorageConfig;
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    operation::get_object::GetObjectError,
    primitives::ByteStream,
    Client,
};

/// Checkpoint kept as a single object in an S3-compatible bucket.
pub struct S3Storage {
    client: Client,
    bucket: String,
    key: String,
}

impl S3Storage {
    pub fn new(config: &S3StorageConfig, name: &str, zone: &str) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "logpull-checkpoint",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::debug!(bucket = %config.bucket, "S3 checkpoint client initialized");

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            key: object_key(name, zone),
        }
    }
}

pub(crate) fn object_key(name: &str, zone: &str) -> String {
    format!("{name}-{zone}.state")
}

#[async_trait]
impl Storage for S3Storage {
    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    async fn read_checkpoint(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(GetObjectError::is_no_such_key)
                {
                    return Ok(None);
                }
                return Err(StorageError::ObjectStore(format!(
                    "get {}: {}",
                    self.location(),
                    aws_sdk_s3::error::DisplayErrorContext(&err)
                )));
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ObjectStore(format!("read body of {}: {e}", self.location())))?
            .into_bytes();

        Ok(Some(bytes.to_vec()))
    }

    async fn write_checkpoint(&self, bytes: &[u8]) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type("application/json")
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| {
                StorageError::ObjectStore(format!(
                    "put {}: {}",
                    self.location(),
                    aws_sdk_s3::error::DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}
