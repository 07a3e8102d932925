//! Manifest handling for the GitOps pipeline: path interpolation and the
//! YAML decode -> patch -> encode round trip.

use thiserror::Error;

use crate::crds::Remediation;
use crate::remediate::{Workload, WorkloadKind};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to decode manifest: {0}")]
    Decode(#[source] serde_yaml::Error),

    #[error("failed to encode manifest: {0}")]
    Encode(#[source] serde_yaml::Error),

    #[error("manifest has no kind field")]
    MissingKind,

    #[error("unsupported manifest kind: {0}")]
    UnsupportedKind(String),
}

/// Substitute `{environment}`, `{namespace}` and `{name}` in a manifest
/// path template. Substitution is literal string replacement.
#[must_use]
pub fn interpolate_path(template: &str, remediation: &Remediation) -> String {
    let environment = remediation
        .spec
        .strategy
        .environment
        .as_deref()
        .unwrap_or_default();
    template
        .replace("{environment}", environment)
        .replace("{namespace}", &remediation.spec.target.namespace)
        .replace("{name}", &remediation.spec.target.name)
}

/// Decode a workload manifest. The kind is sniffed from the document
/// before deserializing into the matching typed object.
pub fn decode_workload(yaml: &str) -> Result<Workload, ManifestError> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(ManifestError::Decode)?;
    let kind = value
        .get("kind")
        .and_then(serde_yaml::Value::as_str)
        .ok_or(ManifestError::MissingKind)?;

    let kind: WorkloadKind = kind
        .parse()
        .map_err(|_| ManifestError::UnsupportedKind(kind.to_string()))?;

    let workload = match kind {
        WorkloadKind::Deployment => Workload::Deployment(Box::new(
            serde_yaml::from_value(value).map_err(ManifestError::Decode)?,
        )),
        WorkloadKind::StatefulSet => Workload::StatefulSet(Box::new(
            serde_yaml::from_value(value).map_err(ManifestError::Decode)?,
        )),
        WorkloadKind::DaemonSet => Workload::DaemonSet(Box::new(
            serde_yaml::from_value(value).map_err(ManifestError::Decode)?,
        )),
    };

    Ok(workload)
}

/// Encode a workload back to YAML.
pub fn encode_workload(workload: &Workload) -> Result<String, ManifestError> {
    let encoded = match workload {
        Workload::Deployment(d) => serde_yaml::to_string(d),
        Workload::StatefulSet(s) => serde_yaml::to_string(s),
        Workload::DaemonSet(d) => serde_yaml::to_string(d),
    };
    encoded.map_err(ManifestError::Encode)
}
