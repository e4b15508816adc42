//! Durable object storage for backup artifacts.
//!
//! Supports any S3-compatible endpoint and an in-memory backend for tests.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use thiserror::Error;
use tracing::{debug, warn};

/// S3 connection settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: String,
    pub region: Option<String>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("local staging error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage misconfigured: {0}")]
    Config(String),
}

/// Bucket-scoped object storage.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStorage {
    /// Connect to an S3-compatible bucket.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::new().with_bucket_name(&config.bucket);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }
        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(access_key) = &config.access_key {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.secret_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(Self::with_store(Arc::new(store), config.bucket.clone()))
    }

    /// Use a pre-configured store.
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// In-memory storage.
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self::with_store(Arc::new(InMemory::new()), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// `s3://{bucket}/{prefix}/`
    pub fn location(&self, prefix: &str) -> String {
        format!("s3://{}/{}/", self.bucket, prefix.trim_end_matches('/'))
    }

    /// Upload a local file to `key`.
    pub async fn put_file(&self, key: &str, local_path: &Path) -> Result<u64, StorageError> {
        let data = tokio::fs::read(local_path).await?;
        let size = data.len() as u64;
        self.store
            .put(&ObjectPath::from(key), Bytes::from(data).into())
            .await?;
        debug!(key, size, "Uploaded object");
        Ok(size)
    }

    #[cfg(test)]
    pub(crate) async fn put_bytes(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        self.store.put(&ObjectPath::from(key), data.into()).await?;
        Ok(())
    }

    /// Download `key` into a local file.
    pub async fn get_to_file(&self, key: &str, local_path: &Path) -> Result<u64, StorageError> {
        let data = self.store.get(&ObjectPath::from(key)).await?.bytes().await?;
        tokio::fs::write(local_path, &data).await?;
        debug!(key, size = data.len(), "Downloaded object");
        Ok(data.len() as u64)
    }

    /// Keys under `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = ObjectPath::from(prefix);
        let mut stream = self.store.list(Some(&prefix));
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            keys.push(meta?.location.to_string());
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(&ObjectPath::from(key)).await?;
        Ok(())
    }

    /// Delete every key under `prefix`. Stops at the first failure.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let keys = self.list(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        Ok(keys.len())
    }

    /// Delete `keys`, logging failures instead of returning them.
    pub async fn delete_best_effort(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.delete(key).await {
                warn!(key = %key, error = %e, "Failed to delete object");
            }
        }
    }
}

/// Last path segment of an object key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
