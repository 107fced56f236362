//! S3-compatible object store.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::{validate_key, ObjectStore, StorageError};

/// Content type recorded on every stored artifact.
const CONTENT_TYPE_JSON: &str = "application/json";

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the ambient AWS environment (credentials chain,
    /// region). `endpoint` overrides the service URL for S3-compatible
    /// stores such as MinIO, which also need path-style addressing.
    pub async fn from_env(bucket: impl Into<String>, endpoint: Option<String>) -> Self {
        let sdk_config = aws_config::load_from_env().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self::new(Client::from_conf(builder.build()), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        let len = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(CONTENT_TYPE_JSON)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Transport(DisplayErrorContext(&e).to_string()))?;

        tracing::debug!(bucket = %self.bucket, key, bytes = len, "Stored object in S3");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None)
            }
            Err(e) => return Err(StorageError::Transport(DisplayErrorContext(&e).to_string())),
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(Some(data.into_bytes().to_vec()))
    }
}
