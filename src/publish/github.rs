//! GitHub contents API publisher, served through GitHub Pages.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::Publisher;
use crate::error::PublishError;

const API_BASE: &str = "https://api.github.com";

pub struct GitHubPublisher {
    client: Client,
    token: SecretString,
    owner: String,
    repo: String,
    branch: String,
    api_base: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ContentsEntry {
    sha: String,
}

impl GitHubPublisher {
    pub fn new(
        token: SecretString,
        owner: &str,
        repo: &str,
        branch: &str,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        let client = Client::builder()
            .user_agent(concat!("curriculum-drip/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            token,
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            api_base: API_BASE.to_string(),
            timeout,
        })
    }

    /// Talk to a different API host, e.g. GitHub Enterprise.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn transport_error(&self, e: reqwest::Error) -> PublishError {
        if e.is_timeout() {
            PublishError::Http(format!("request timed out after {:?}", self.timeout))
        } else {
            PublishError::Http(e.to_string())
        }
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    /// Public GitHub Pages URL for `path`.
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "https://{}.github.io/{}/{}",
            self.owner.to_lowercase(),
            self.repo,
            path
        )
    }

    /// SHA of the existing file, if any. Needed to update rather than create.
    async fn existing_sha(&self, path: &str) -> Result<Option<String>, PublishError> {
        let response = self
            .client
            .get(self.contents_url(path))
            .query(&[("ref", self.branch.as_str())])
            .bearer_auth(self.token.expose_secret())
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            StatusCode::OK => {
                let entry: ContentsEntry = response
                    .json()
                    .await
                    .map_err(|e| PublishError::Http(format!("Bad contents response: {e}")))?;
                Ok(Some(entry.sha))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(PublishError::Rejected {
                path: path.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl Publisher for GitHubPublisher {
    async fn put(&self, path: &str, content: &str) -> Result<String, PublishError> {
        let sha = self.existing_sha(path).await?;

        let mut payload = serde_json::json!({
            "message": format!("Publish {path}"),
            "content": STANDARD.encode(content.as_bytes()),
            "branch": self.branch,
        });
        if let Some(sha) = &sha {
            payload["sha"] = serde_json::Value::String(sha.clone());
        }

        let response = self
            .client
            .put(self.contents_url(path))
            .bearer_auth(self.token.expose_secret())
            .header("Accept", "application/vnd.github+json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected {
                path: path.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        debug!(path, updated = sha.is_some(), "Published to GitHub");
        Ok(self.public_url(path))
    }
}
