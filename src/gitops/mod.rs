//! GitOps patch pipeline.
//!
//! An out-of-cluster worker that polls for remediations parked in
//! Pending, fetches the target workload's manifest from GitHub, applies
//! the remediation's patch to the decoded object and opens a pull
//! request with the mutated manifest.

pub mod github;
pub mod manifest;
pub mod processor;

pub use github::{GitHubClient, GitHubError};
pub use processor::Processor;
