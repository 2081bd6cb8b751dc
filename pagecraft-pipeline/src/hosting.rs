//! GitHub REST client for the repository and git-data calls publication needs.
//!
//! Only the endpoints the pipeline touches are modelled:
//!   GET    /user
//!   DELETE /repos/{owner}/{repo}
//!   POST   /user/repos
//!   GET    /repos/{owner}/{repo}/git/ref/heads/{branch}
//!   POST   /repos/{owner}/{repo}/git/blobs | trees | commits
//!   PATCH  /repos/{owner}/{repo}/git/refs/heads/{branch}
//!   POST   /repos/{owner}/{repo}/pages
//!   GET    /repos/{owner}/{repo}/contents/{path}

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::PipelineConfig;
use crate::error::HostingError;

/// Blob payload encodings accepted by the git-data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlobEncoding {
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

/// One entry of a git tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sha: String,
}

impl TreeEntry {
    /// A regular, non-executable file.
    pub fn file(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: "100644",
            kind: "blob",
            sha: sha.into(),
        }
    }
}

/// A freshly created repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedRepo {
    pub html_url: String,
}

/// Result of asking for Pages to be switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagesStatus {
    Enabled,
    AlreadyEnabled,
}

/// The hosting operations publication is built from.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Login of the token's owner.
    async fn authenticated_login(&self) -> Result<String, HostingError>;

    /// Delete a repository. `Ok(false)` when it did not exist.
    async fn delete_repo(&self, owner: &str, name: &str) -> Result<bool, HostingError>;

    /// Create a public repository with an initial commit on the default branch.
    async fn create_repo(&self, name: &str, description: &str) -> Result<CreatedRepo, HostingError>;

    /// Commit SHA at the tip of `branch`.
    async fn branch_tip(&self, owner: &str, name: &str, branch: &str) -> Result<String, HostingError>;

    async fn create_blob(
        &self,
        owner: &str,
        name: &str,
        content: &str,
        encoding: BlobEncoding,
    ) -> Result<String, HostingError>;

    async fn create_tree(
        &self,
        owner: &str,
        name: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, HostingError>;

    async fn create_commit(
        &self,
        owner: &str,
        name: &str,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<String, HostingError>;

    /// Point `heads/{branch}` at `sha`.
    async fn update_ref(&self, owner: &str, name: &str, branch: &str, sha: &str) -> Result<(), HostingError>;

    /// Serve `branch` at `path` via Pages.
    async fn enable_pages(&self, owner: &str, name: &str, branch: &str, path: &str) -> Result<PagesStatus, HostingError>;

    /// Decoded text of a file, or an empty string when it does not exist.
    async fn file_content(&self, owner: &str, name: &str, path: &str) -> Result<String, HostingError>;
}

/// Reqwest-backed GitHub client.
pub struct GitHubClient {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl GitHubClient {
    /// Fails immediately when no token is configured.
    pub fn new(config: &PipelineConfig) -> Result<Self, HostingError> {
        let token = config
            .github_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(HostingError::MissingCredential("GITHUB_TOKEN"))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("pagecraft/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            token,
            base_url: config.github_api_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Turn a non-2xx response into an API error carrying GitHub's message.
    async fn check(
        operation: &'static str,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, HostingError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["message"].as_str().map(str::to_string))
            .unwrap_or(body);
        Err(HostingError::Api {
            operation,
            status: status.as_u16(),
            message,
        })
    }

    async fn json_field(
        operation: &'static str,
        resp: reqwest::Response,
        pointer: &str,
    ) -> Result<String, HostingError> {
        let value: serde_json::Value = Self::check(operation, resp).await?.json().await?;
        value
            .pointer(pointer)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| HostingError::InvalidResponse {
                operation,
                detail: format!("missing {pointer}"),
            })
    }
}

#[async_trait]
impl HostingApi for GitHubClient {
    async fn authenticated_login(&self) -> Result<String, HostingError> {
        let resp = self.request(reqwest::Method::GET, "/user").send().await?;
        Self::json_field("get authenticated user", resp, "/login").await
    }

    async fn delete_repo(&self, owner: &str, name: &str) -> Result<bool, HostingError> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/repos/{owner}/{name}"))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check("delete repository", resp).await?;
        Ok(true)
    }

    async fn create_repo(&self, name: &str, description: &str) -> Result<CreatedRepo, HostingError> {
        let resp = self
            .request(reqwest::Method::POST, "/user/repos")
            .json(&json!({
                "name": name,
                "description": description,
                "auto_init": true,
                "private": false,
            }))
            .send()
            .await?;
        Ok(Self::check("create repository", resp).await?.json().await?)
    }

    async fn branch_tip(&self, owner: &str, name: &str, branch: &str) -> Result<String, HostingError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{owner}/{name}/git/ref/heads/{branch}"),
            )
            .send()
            .await?;
        Self::json_field("get branch ref", resp, "/object/sha").await
    }

    async fn create_blob(
        &self,
        owner: &str,
        name: &str,
        content: &str,
        encoding: BlobEncoding,
    ) -> Result<String, HostingError> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/repos/{owner}/{name}/git/blobs"))
            .json(&json!({ "content": content, "encoding": encoding }))
            .send()
            .await?;
        Self::json_field("create blob", resp, "/sha").await
    }

    async fn create_tree(
        &self,
        owner: &str,
        name: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, HostingError> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/repos/{owner}/{name}/git/trees"))
            .json(&json!({ "base_tree": base_tree, "tree": entries }))
            .send()
            .await?;
        Self::json_field("create tree", resp, "/sha").await
    }

    async fn create_commit(
        &self,
        owner: &str,
        name: &str,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<String, HostingError> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/repos/{owner}/{name}/git/commits"))
            .json(&json!({ "message": message, "tree": tree, "parents": parents }))
            .send()
            .await?;
        Self::json_field("create commit", resp, "/sha").await
    }

    async fn update_ref(&self, owner: &str, name: &str, branch: &str, sha: &str) -> Result<(), HostingError> {
        let resp = self
            .request(
                reqwest::Method::PATCH,
                &format!("/repos/{owner}/{name}/git/refs/heads/{branch}"),
            )
            .json(&json!({ "sha": sha }))
            .send()
            .await?;
        Self::check("update branch ref", resp).await?;
        Ok(())
    }

    async fn enable_pages(&self, owner: &str, name: &str, branch: &str, path: &str) -> Result<PagesStatus, HostingError> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/repos/{owner}/{name}/pages"))
            .json(&json!({ "source": { "branch": branch, "path": path } }))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Ok(PagesStatus::AlreadyEnabled);
        }
        Self::check("enable pages", resp).await?;
        Ok(PagesStatus::Enabled)
    }

    async fn file_content(&self, owner: &str, name: &str, path: &str) -> Result<String, HostingError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/repos/{owner}/{name}/contents/{path}"))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(String::new());
        }
        let value: serde_json::Value = Self::check("get file content", resp).await?.json().await?;
        let Some(encoded) = value["content"].as_str() else {
            return Ok(String::new());
        };
        // GitHub wraps base64 content at 60 columns.
        let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| HostingError::InvalidResponse {
                operation: "get file content",
                detail: format!("content is not base64: {e}"),
            })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
