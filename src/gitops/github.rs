//! GitHub client for the GitOps pipeline.
//!
//! Wraps octocrab with the handful of operations the worker needs:
//! resolving and (force-)updating branch refs, reading and writing file
//! contents, and opening pull requests. Authentication is a GitHub App
//! installation token derived from the app id + installation id + private
//! key.

use base64::Engine;
use octocrab::models::repos::Object;
use octocrab::models::{AppId, InstallationId};
use octocrab::params::repos::Reference;
use octocrab::Octocrab;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum GitHubError {
    #[error("bad credentials: {0}")]
    BadCredentials(String),

    #[error("failed to fetch {path}@{reference}: {source}")]
    FetchFailed {
        path: String,
        reference: String,
        #[source]
        source: octocrab::Error,
    },

    #[error("failed to create/update branch {branch}: {source}")]
    BranchFailed {
        branch: String,
        #[source]
        source: octocrab::Error,
    },

    #[error("failed to write {path}: {source}")]
    FilePutFailed {
        path: String,
        #[source]
        source: octocrab::Error,
    },

    #[error("failed to open pull request: {0}")]
    PrOpenFailed(#[source] octocrab::Error),
}

/// A file fetched from a repository.
#[derive(Debug, Clone)]
pub struct RepoFile {
    pub content: String,
    /// Blob SHA, needed to update the file in place.
    pub sha: String,
}

pub struct GitHubClient {
    octocrab: Octocrab,
}

impl GitHubClient {
    /// Authenticate as a GitHub App installation.
    pub fn new_app(
        app_id: u64,
        installation_id: u64,
        private_key_path: impl AsRef<Path>,
    ) -> Result<Self, GitHubError> {
        let pem = std::fs::read(private_key_path.as_ref())
            .map_err(|err| GitHubError::BadCredentials(err.to_string()))?;
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(&pem)
            .map_err(|err| GitHubError::BadCredentials(err.to_string()))?;

        let app = Octocrab::builder()
            .app(AppId(app_id), key)
            .build()
            .map_err(|err| GitHubError::BadCredentials(err.to_string()))?;
        let octocrab = app
            .installation(InstallationId(installation_id))
            .map_err(|err| GitHubError::BadCredentials(err.to_string()))?;

        Ok(Self { octocrab })
    }

    /// Authenticate with a personal access token. Used by local runs and
    /// tests against a sandbox repository.
    pub fn with_token(token: String) -> Result<Self, GitHubError> {
        let octocrab = Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|err| GitHubError::BadCredentials(err.to_string()))?;
        Ok(Self { octocrab })
    }

    /// Commit SHA a branch currently points at.
    pub async fn branch_sha(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<String, GitHubError> {
        let reference = self
            .octocrab
            .repos(owner, repo)
            .get_ref(&Reference::Branch(branch.to_string()))
            .await
            .map_err(|source| GitHubError::BranchFailed {
                branch: branch.to_string(),
                source,
            })?;

        let sha = match reference.object {
            Object::Commit { sha, .. } | Object::Tag { sha, .. } => sha,
            _ => String::new(),
        };
        Ok(sha)
    }

    /// Point `branch` at `sha`, creating it when absent and force-updating
    /// the ref when it already exists.
    pub async fn ensure_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitHubError> {
        let created = self
            .octocrab
            .repos(owner, repo)
            .create_ref(&Reference::Branch(branch.to_string()), sha)
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(create_err) => {
                debug!(branch, "branch create failed, force-updating ref");
                let route = format!("/repos/{owner}/{repo}/git/refs/heads/{branch}");
                let body = serde_json::json!({ "sha": sha, "force": true });
                self.octocrab
                    .patch::<serde_json::Value, _, _>(route, Some(&body))
                    .await
                    .map_err(|_| GitHubError::BranchFailed {
                        branch: branch.to_string(),
                        source: create_err,
                    })?;
                Ok(())
            }
        }
    }

    /// Fetch a file. A 404 is the normal "not present" signal and comes
    /// back as `Ok(None)`.
    pub async fn fetch_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<RepoFile>, GitHubError> {
        let result = self
            .octocrab
            .repos(owner, repo)
            .get_content()
            .path(path)
            .r#ref(reference)
            .send()
            .await;

        let contents = match result {
            Ok(contents) => contents,
            Err(err) if is_not_found(&err) => return Ok(None),
            Err(source) => {
                return Err(GitHubError::FetchFailed {
                    path: path.to_string(),
                    reference: reference.to_string(),
                    source,
                })
            }
        };

        let Some(item) = contents.items.into_iter().next() else {
            return Ok(None);
        };
        let content = item.decoded_content().unwrap_or_default();
        Ok(Some(RepoFile {
            content,
            sha: item.sha,
        }))
    }

    /// Create or update a file on a branch. Passing the current blob SHA
    /// turns the call into an update; the API rejects a mismatched SHA,
    /// which protects against clobbering a concurrent change.
    pub async fn put_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
        message: &str,
        content: &str,
        sha: Option<&str>,
    ) -> Result<String, GitHubError> {
        #[derive(Deserialize)]
        struct PutContentsResponse {
            commit: CommitRef,
        }
        #[derive(Deserialize)]
        struct CommitRef {
            sha: String,
        }

        let route = format!("/repos/{owner}/{repo}/contents/{path}");
        let mut body = serde_json::json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content),
            "branch": branch,
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::Value::String(sha.to_string());
        }

        let response: PutContentsResponse = self
            .octocrab
            .put(route, Some(&body))
            .await
            .map_err(|source| GitHubError::FilePutFailed {
                path: path.to_string(),
                source,
            })?;

        Ok(response.commit.sha)
    }

    /// Open a pull request and best-effort apply labels. Returns the PR
    /// number and its HTML URL.
    pub async fn open_pull_request(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        labels: &[String],
    ) -> Result<(u64, String), GitHubError> {
        let pr = self
            .octocrab
            .pulls(owner, repo)
            .create(title, head, base)
            .body(body)
            .send()
            .await
            .map_err(GitHubError::PrOpenFailed)?;

        let number = pr.number;
        let url = pr
            .html_url
            .map(|u| u.to_string())
            .unwrap_or_default();

        if !labels.is_empty() {
            if let Err(err) = self
                .octocrab
                .issues(owner, repo)
                .add_labels(number, labels)
                .await
            {
                debug!(error = %err, number, "failed to label pull request");
            }
        }

        Ok((number, url))
    }
}

fn is_not_found(err: &octocrab::Error) -> bool {
    matches!(
        err,
        octocrab::Error::GitHub { source, .. } if source.status_code == 404
    )
}
