use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::header;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::staging::StagedFile;

/// Durable object storage for attachments.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the staged file under `key` and return its public URL.
    async fn put(&self, key: &str, file: &StagedFile) -> Result<String, UploadError>;

    /// Remove an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), UploadError>;
}

/// Objects stored as plain files under a root directory, served by the
/// server itself under `public_base`.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base: String,
}

impl LocalObjectStore {
    pub async fn new(root: PathBuf, public_base: &str) -> anyhow::Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Object storage directory: {}", root.display());
        Ok(Self {
            root,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, file: &StagedFile) -> Result<String, UploadError> {
        let dest = self.object_path(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(file.path(), &dest).await?;
        debug!("Stored object {} ({} bytes)", key, file.size());
        Ok(format!("{}/{}", self.public_base, key))
    }

    async fn delete(&self, key: &str) -> Result<(), UploadError> {
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => {
                info!("Deleted object {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Object {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Objects pushed to an HTTP endpoint accepting `PUT {base}/{key}`.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, file: &StagedFile) -> Result<String, UploadError> {
        let url = self.object_url(key);
        let source = fs::File::open(file.path()).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(source));

        let resp = self
            .client
            .put(&url)
            .header(header::CONTENT_TYPE, file.content_type())
            .header(header::CONTENT_LENGTH, file.size())
            .header("x-content-sha256", file.sha256())
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(UploadError::Rejected {
                status: resp.status().as_u16(),
                key: key.to_string(),
            });
        }

        debug!("Uploaded object {} ({} bytes)", key, file.size());
        Ok(url)
    }

    async fn delete(&self, key: &str) -> Result<(), UploadError> {
        let resp = self.client.delete(self.object_url(key)).send().await?;
        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(UploadError::Rejected {
                status: status.as_u16(),
                key: key.to_string(),
            })
        }
    }
}
