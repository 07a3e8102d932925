//! `Remediation` Custom Resource Definition.
//!
//! One `Remediation` represents a single in-flight automated healing
//! action, from alert intake through a terminal phase. The spec is
//! immutable after creation; the status is owned by the lifecycle
//! controller and (for the PR-related subset) the GitOps worker.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Current phase of the remediation lifecycle.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum RemediationPhase {
    Pending,
    Analyzing,
    PRCreated,
    Applying,
    Succeeded,
    Failed,
    Expired,
}

impl RemediationPhase {
    /// Terminal phases never change again; reconciling them is a no-op.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Expired)
    }
}

impl fmt::Display for RemediationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Analyzing => "Analyzing",
            Self::PRCreated => "PRCreated",
            Self::Applying => "Applying",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Expired => "Expired",
        };
        f.write_str(s)
    }
}

/// Remediation action type.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ActionType {
    IncreaseMemory,
    ScaleUp,
    RollbackImage,
    CustomScript,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IncreaseMemory => "IncreaseMemory",
            Self::ScaleUp => "ScaleUp",
            Self::RollbackImage => "RollbackImage",
            Self::CustomScript => "CustomScript",
        };
        f.write_str(s)
    }
}

/// How the remediation is applied to the cluster.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum StrategyMode {
    /// Mutation is mediated by a pull request against a manifest repo.
    GitOps,
    /// The controller mutates the workload in the cluster directly.
    Direct,
}

/// Alert information captured from Alertmanager.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct AlertInfo {
    /// Alert name (e.g. "KubePodOOMKilled")
    pub name: String,

    /// Unique identifier for this alert instance
    #[serde(default, rename = "alertId", skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,

    /// Alertmanager fingerprint, used for deduplication
    pub fingerprint: String,

    /// Source of the alert (e.g. "alertmanager")
    pub source: String,

    /// Severity: critical, warning or info
    pub severity: String,

    /// Raw alert payload (JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// The workload the action is applied to.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct TargetResource {
    /// Kind of the resource: Deployment, StatefulSet or DaemonSet
    pub kind: String,

    /// Name of the resource
    pub name: String,

    /// Namespace of the resource
    pub namespace: String,

    /// Container name, when the pod has more than one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

/// A typed, parameterized mutation on a workload.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct Action {
    /// Type of action
    #[serde(rename = "type")]
    pub action_type: ActionType,

    /// Parameters for the action (varies by type)
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_require_approval() -> bool {
    true
}

fn default_ttl() -> Option<String> {
    Some("24h".to_string())
}

/// How the remediation should be applied.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct Strategy {
    /// GitOps or Direct
    pub mode: StrategyMode,

    /// Whether human approval is required before applying
    #[serde(default = "default_require_approval", rename = "requireApproval")]
    pub require_approval: bool,

    /// Environment (e.g. "prod", "staging", "dev")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// TTL for the remediation (e.g. "24h"); once exceeded at PRCreated
    /// the record expires
    #[serde(default = "default_ttl", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_base_branch() -> String {
    "main".to_string()
}

/// GitHub integration settings, required for GitOps mode.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct GitHubSpec {
    /// Whether GitHub integration is active for this record
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Repository owner
    pub owner: String,

    /// Repository name
    pub repo: String,

    /// Base branch for PRs
    #[serde(default = "default_base_branch", rename = "baseBranch")]
    pub base_branch: String,

    /// Path template to the manifest file. Supports `{environment}`,
    /// `{namespace}` and `{name}` placeholders.
    #[serde(rename = "manifestPath")]
    pub manifest_path: String,

    /// PR title template; `{action}`, `{target}`, `{namespace}` and
    /// `{alert}` are substituted
    #[serde(
        default,
        rename = "prTitleTemplate",
        skip_serializing_if = "Option::is_none"
    )]
    pub pr_title_template: Option<String>,

    /// Labels to add to the PR
    #[serde(default, rename = "prLabels", skip_serializing_if = "Vec::is_empty")]
    pub pr_labels: Vec<String>,

    /// Whether the PR should be auto-merged
    #[serde(default, rename = "autoMerge")]
    pub auto_merge: bool,
}

/// `Remediation` CRD.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "heal8s.io", version = "v1alpha1", kind = "Remediation")]
#[kube(namespaced)]
#[kube(status = "RemediationStatus")]
#[kube(shortname = "rem")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.target.name"}"#)]
#[kube(printcolumn = r#"{"name":"Action","type":"string","jsonPath":".spec.action.type"}"#)]
#[kube(printcolumn = r#"{"name":"PR","type":"integer","jsonPath":".status.prNumber"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct RemediationSpec {
    /// Alert that triggered the remediation
    pub alert: AlertInfo,

    /// Target resource to remediate
    pub target: TargetResource,

    /// Action to take
    pub action: Action,

    /// Strategy for applying the remediation
    pub strategy: Strategy,

    /// GitHub integration settings (required when mode is GitOps)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GitHubSpec>,
}

/// One observation on the record, appended at phase transitions.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct RemediationCondition {
    /// Condition type (e.g. "AlertReceived", "Applied", "Failed")
    #[serde(rename = "type")]
    pub condition_type: String,

    /// "True" / "False" / "Unknown"
    pub status: String,

    /// Generation of the spec the condition was observed against
    #[serde(
        default,
        rename = "observedGeneration",
        skip_serializing_if = "Option::is_none"
    )]
    pub observed_generation: Option<i64>,

    /// RFC 3339 transition timestamp
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: String,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable message
    pub message: String,
}

/// Observed state, owned by the controllers. Timestamps are RFC 3339.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct RemediationStatus {
    /// Current lifecycle phase; absent until the first reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<RemediationPhase>,

    /// Human-readable explanation of the phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// GitHub PR number, set once the PR is opened
    #[serde(default, rename = "prNumber", skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,

    /// Full URL to the PR
    #[serde(default, rename = "prUrl", skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,

    /// Commit SHA of the manifest change
    #[serde(default, rename = "commitSHA", skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,

    /// When the remediation was applied
    #[serde(default, rename = "appliedAt", skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<String>,

    /// When the remediation reached a terminal outcome
    #[serde(default, rename = "resolvedAt", skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,

    /// Number of direct-apply attempts; never decreases
    #[serde(default)]
    pub attempts: u32,

    /// When the status was last written
    #[serde(
        default,
        rename = "lastUpdateTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_update_time: Option<String>,

    /// Latest available observations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<RemediationCondition>,
}

impl RemediationStatus {
    /// Set or replace the condition with the given type, preserving the
    /// order of first appearance.
    pub fn set_condition(&mut self, condition: RemediationCondition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }
}

impl Remediation {
    /// Phase as observed on the record; `None` means a freshly created
    /// record the controller has not touched yet.
    #[must_use]
    pub fn phase(&self) -> Option<RemediationPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// True once the record has landed in a terminal phase.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase().is_some_and(RemediationPhase::is_terminal)
    }

    /// True when the GitOps worker should pick this record up.
    #[must_use]
    pub fn awaits_gitops(&self) -> bool {
        self.phase() == Some(RemediationPhase::Pending)
            && self.spec.github.as_ref().is_some_and(|gh| gh.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> RemediationSpec {
        RemediationSpec {
            alert: AlertInfo {
                name: "KubePodOOMKilled".to_string(),
                alert_id: None,
                fingerprint: "abc123".to_string(),
                source: "alertmanager".to_string(),
                severity: "critical".to_string(),
                payload: None,
            },
            target: TargetResource {
                kind: "Deployment".to_string(),
                name: "test-app".to_string(),
                namespace: "default".to_string(),
                container: Some("app".to_string()),
            },
            action: Action {
                action_type: ActionType::IncreaseMemory,
                params: HashMap::from([
                    ("memoryIncreasePercent".to_string(), "25".to_string()),
                    ("maxMemory".to_string(), "2Gi".to_string()),
                ]),
            },
            strategy: Strategy {
                mode: StrategyMode::GitOps,
                require_approval: true,
                environment: Some("prod".to_string()),
                ttl: Some("24h".to_string()),
            },
            github: None,
        }
    }

    #[test]
    fn test_phase_terminality() {
        assert!(RemediationPhase::Succeeded.is_terminal());
        assert!(RemediationPhase::Failed.is_terminal());
        assert!(RemediationPhase::Expired.is_terminal());
        assert!(!RemediationPhase::Pending.is_terminal());
        assert!(!RemediationPhase::Analyzing.is_terminal());
        assert!(!RemediationPhase::PRCreated.is_terminal());
        assert!(!RemediationPhase::Applying.is_terminal());
    }

    #[test]
    fn test_spec_serde_round_trip() {
        let spec = sample_spec();
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"type\":\"IncreaseMemory\""));
        assert!(json.contains("\"requireApproval\":true"));

        let back: RemediationSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action.action_type, ActionType::IncreaseMemory);
        assert_eq!(back.target.container.as_deref(), Some("app"));
        assert_eq!(back.strategy.mode, StrategyMode::GitOps);
    }

    #[test]
    fn test_strategy_defaults_on_deserialize() {
        let json = r#"{"mode":"GitOps"}"#;
        let strategy: Strategy = serde_json::from_str(json).unwrap();
        assert!(strategy.require_approval);
        assert_eq!(strategy.ttl.as_deref(), Some("24h"));
        assert!(strategy.environment.is_none());
    }

    #[test]
    fn test_github_spec_defaults() {
        let json = r#"{"owner":"acme","repo":"manifests","manifestPath":"k8s/{name}.yaml"}"#;
        let gh: GitHubSpec = serde_json::from_str(json).unwrap();
        assert!(gh.enabled);
        assert_eq!(gh.base_branch, "main");
        assert!(!gh.auto_merge);
        assert!(gh.pr_labels.is_empty());
    }

    #[test]
    fn test_set_condition_replaces_by_type() {
        let mut status = RemediationStatus::default();
        status.set_condition(RemediationCondition {
            condition_type: "AlertReceived".to_string(),
            status: "True".to_string(),
            observed_generation: Some(1),
            last_transition_time: "2026-01-01T00:00:00Z".to_string(),
            reason: "AlertReceived".to_string(),
            message: "first".to_string(),
        });
        status.set_condition(RemediationCondition {
            condition_type: "AlertReceived".to_string(),
            status: "True".to_string(),
            observed_generation: Some(2),
            last_transition_time: "2026-01-01T00:01:00Z".to_string(),
            reason: "AlertReceived".to_string(),
            message: "second".to_string(),
        });
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].message, "second");
    }
}
