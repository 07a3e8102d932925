//! heal8s - auto-remediation for Kubernetes workloads.
//!
//! Firing alerts arrive on an Alertmanager webhook, get routed to a
//! remediation action and materialized as `Remediation` custom resources.
//! A lifecycle controller drives each record through a phase machine; in
//! Direct mode it mutates the workload in-cluster, in GitOps mode an
//! out-of-cluster worker fetches the workload's manifest, applies the same
//! patch and opens a pull request against the manifest repository.

pub mod config;
pub mod controller;
pub mod crds;
pub mod dashboard;
pub mod error;
pub mod gitops;
pub mod metrics;
pub mod remediate;
pub mod webhook;

pub use crds::{Remediation, RemediationSpec, RemediationStatus};
pub use error::{Error, Result};
