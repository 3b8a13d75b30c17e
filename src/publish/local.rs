//! Local directory publisher, for a static file server or development.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::Publisher;
use crate::error::PublishError;

pub struct LocalDirPublisher {
    root: PathBuf,
    base_url: String,
}

impl LocalDirPublisher {
    pub fn new(root: PathBuf, base_url: &str) -> Self {
        Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, PublishError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || path.is_empty() {
            return Err(PublishError::Rejected {
                path: path.to_string(),
                status: 400,
                body: "path must be relative and stay under the publish root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Publisher for LocalDirPublisher {
    async fn put(&self, path: &str, content: &str) -> Result<String, PublishError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        debug!(path = %target.display(), "Published to local directory");
        Ok(format!("{}/{}", self.base_url, path))
    }
}
