//! Best-effort mirroring of the subscriptions file to a GitHub repository.
//!
//! The contents API requires the current blob sha to update an existing
//! file, so every push is a GET for metadata followed by a PUT. Mirroring
//! never blocks or rolls back the local write; a failed push only logs.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{info, warn};

use crate::config::GithubSettings;

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Client for one mirrored file in one repository.
#[derive(Clone)]
pub struct Mirror {
    client: reqwest::Client,
    api_base: String,
    token: String,
    repo: String,
    file_path: String,
    branch: String,
}

impl Mirror {
    pub fn new(gh: &GithubSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("wikigram/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(20))
            .build()
            .context("building github client")?;
        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            token: gh.token.clone(),
            repo: gh.repo.clone(),
            file_path: gh.file_path.clone(),
            branch: gh.branch.clone(),
        })
    }

    fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.api_base, self.repo, self.file_path
        )
    }

    /// Current blob sha of the mirrored file; `None` when it doesn't
    /// exist yet (the PUT then creates it).
    async fn current_sha(&self) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.contents_url())
            .query(&[("ref", self.branch.as_str())])
            .bearer_auth(&self.token)
            .send()
            .await
            .context("fetching mirror file metadata")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("metadata lookup returned HTTP {}", response.status());
        }
        let body: serde_json::Value = response.json().await.context("decoding file metadata")?;
        Ok(body
            .get("sha")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// Create or update the mirrored file with `content`.
    pub async fn push(&self, content: &str) -> Result<()> {
        let sha = self.current_sha().await?;
        let mut payload = json!({
            "message": "Update subscription settings",
            "content": BASE64.encode(content),
            "branch": self.branch,
        });
        if let Some(sha) = sha {
            payload["sha"] = json!(sha);
        }
        let response = self
            .client
            .put(self.contents_url())
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .context("uploading mirror file")?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            bail!("upload returned HTTP {status}");
        }
        info!(repo = %self.repo, path = %self.file_path, "settings mirrored to github");
        Ok(())
    }

    /// Push in the background; failures are logged, never propagated.
    pub fn spawn_push(&self, content: String) {
        let mirror = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mirror.push(&content).await {
                warn!(error = %e, "settings mirror failed");
            }
        });
    }
}
