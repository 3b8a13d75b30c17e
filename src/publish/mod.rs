//! Publishing store: writes rendered pages and returns their public URLs.
//!
//! Paths are derived deterministically from (email, topic, unit), so a
//! re-run after a crash overwrites the same file instead of creating a new one.

mod github;
mod local;

pub use github::GitHubPublisher;
pub use local::LocalDirPublisher;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PublishConfig;
use crate::error::PublishError;

/// Overwrite-idempotent page store.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Store `content` at `path`, replacing any previous version. Returns the public URL.
    async fn put(&self, path: &str, content: &str) -> Result<String, PublishError>;
}

/// Build the publisher selected by configuration.
pub fn create_publisher(config: &PublishConfig) -> Result<Arc<dyn Publisher>, PublishError> {
    Ok(match config {
        PublishConfig::LocalDir { root, base_url } => {
            Arc::new(LocalDirPublisher::new(root.clone(), base_url))
        }
        PublishConfig::GitHub {
            token,
            owner,
            repo,
            branch,
            timeout,
        } => Arc::new(GitHubPublisher::new(
            token.clone(),
            owner,
            repo,
            branch,
            *timeout,
        )?),
    })
}

/// Path of a unit page: `reports/{user}/{topic}/{index:02}_{title}.html`.
pub fn unit_path(email: &str, topic: &str, index: usize, title: &str) -> String {
    format!(
        "{}/{:02}_{}.html",
        topic_dir(email, topic),
        index,
        slugify(title)
    )
}

/// Path of a curriculum index page: `reports/{user}/{topic}/index.html`.
pub fn plan_path(email: &str, topic: &str) -> String {
    format!("{}/index.html", topic_dir(email, topic))
}

fn topic_dir(email: &str, topic: &str) -> String {
    format!("reports/{}/{}", user_dir(email), slugify(topic))
}

/// Local part of the email, alphanumerics only, lower-cased.
pub fn user_dir(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let dir: String = local
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_lowercase();
    if dir.is_empty() { "user".to_string() } else { dir }
}

/// Keep `[a-z0-9-_]`, turn whitespace runs into `_`.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_gap = false;
    for c in value.trim().chars() {
        if c.is_whitespace() {
            pending_gap = true;
        } else if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            if pending_gap && !out.is_empty() {
                out.push('_');
            }
            pending_gap = false;
            out.push(c.to_ascii_lowercase());
        }
    }
    if out.is_empty() { "untitled".to_string() } else { out }
}
