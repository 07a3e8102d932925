use thiserror::Error;

use crate::remediate::PatchError;

/// Errors surfaced by the controller and the GitOps worker plumbing.
///
/// Semantic failures (routing, patch computation) are recorded on the
/// `Remediation` status as a terminal `Failed` phase; everything here is
/// the transient/infrastructure side that bubbles up to the caller so the
/// scheduler can retry with backoff.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("GitHub error: {0}")]
    GitHub(#[from] crate::gitops::GitHubError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("missing object key: {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    /// True when the error came back from the API server as a 409 conflict
    /// on an optimistic-concurrency write. Conflicts are dropped; the next
    /// reconcile observes the winner's state and catches up.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }

    /// True when the API server reported the object as gone. Benign for
    /// remediations (the record was deleted out from under us).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
