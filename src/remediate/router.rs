//! Alert routing: map an Alertmanager alert to a remediation spec.
//!
//! Routing is a static table keyed by alert name. Each route carries the
//! action type and its default parameters; the target workload is
//! extracted from the alert's labels.

use std::collections::HashMap;
use thiserror::Error;

use crate::crds::{Action, ActionType, AlertInfo, RemediationSpec, Strategy, StrategyMode, TargetResource};
use crate::webhook::payload::AlertmanagerAlert;

/// Routing failures. Each maps to a distinct skip reason in the intake
/// handler's logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("alert has no alertname label")]
    MissingAlertName,

    #[error("no route configured for alert: {0}")]
    UnknownAlert(String),

    #[error("alert has no namespace label")]
    MissingNamespace,

    #[error("cannot determine target resource from alert labels")]
    MissingTargetLabels,
}

/// How one alert name is handled.
#[derive(Debug, Clone)]
pub struct Route {
    pub action: ActionType,
    pub params: HashMap<String, String>,
}

/// Static alert-name routing table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl Default for RouteTable {
    fn default() -> Self {
        let memory_params = HashMap::from([
            ("memoryIncreasePercent".to_string(), "25".to_string()),
            ("maxMemory".to_string(), "2Gi".to_string()),
        ]);

        let mut routes = HashMap::new();
        routes.insert(
            "KubePodOOMKilled".to_string(),
            Route {
                action: ActionType::IncreaseMemory,
                params: memory_params.clone(),
            },
        );
        routes.insert(
            "ContainerOOMKilled".to_string(),
            Route {
                action: ActionType::IncreaseMemory,
                params: memory_params,
            },
        );
        routes.insert(
            "KubeHpaMaxedOut".to_string(),
            Route {
                action: ActionType::ScaleUp,
                params: HashMap::from([
                    ("scaleUpPercent".to_string(), "50".to_string()),
                    ("maxReplicas".to_string(), "10".to_string()),
                ]),
            },
        );
        routes.insert(
            "KubePodCrashLooping".to_string(),
            Route {
                action: ActionType::RollbackImage,
                params: HashMap::from([("rollbackMaxRevisions".to_string(), "5".to_string())]),
            },
        );

        Self { routes }
    }
}

impl RouteTable {
    /// Resolve an alert into a remediation spec, or a routing error.
    pub fn route(&self, alert: &AlertmanagerAlert) -> Result<RemediationSpec, RouteError> {
        let alertname = alert
            .labels
            .get("alertname")
            .filter(|name| !name.is_empty())
            .ok_or(RouteError::MissingAlertName)?;

        let route = self
            .routes
            .get(alertname)
            .ok_or_else(|| RouteError::UnknownAlert(alertname.clone()))?;

        let target = extract_target(alert)?;

        Ok(RemediationSpec {
            alert: AlertInfo {
                name: alertname.clone(),
                alert_id: None,
                fingerprint: alert.fingerprint.clone(),
                source: "alertmanager".to_string(),
                severity: alert
                    .labels
                    .get("severity")
                    .cloned()
                    .unwrap_or_default(),
                payload: None,
            },
            target,
            action: Action {
                action_type: route.action,
                params: route.params.clone(),
            },
            strategy: Strategy {
                mode: StrategyMode::GitOps,
                require_approval: true,
                environment: alert.labels.get("environment").cloned(),
                ttl: Some("24h".to_string()),
            },
            github: None,
        })
    }
}

/// Extract the target workload from alert labels.
///
/// Preference order: `deployment`, `statefulset`, then `pod`. A pod-only
/// alert uses the pod name verbatim as the Deployment name; production
/// alert rules are expected to attach the owner's `deployment` label
/// directly rather than rely on that approximation.
fn extract_target(alert: &AlertmanagerAlert) -> Result<TargetResource, RouteError> {
    let namespace = alert
        .labels
        .get("namespace")
        .filter(|ns| !ns.is_empty())
        .ok_or(RouteError::MissingNamespace)?;

    let (kind, name) = if let Some(deployment) = non_empty_label(alert, "deployment") {
        ("Deployment", deployment)
    } else if let Some(statefulset) = non_empty_label(alert, "statefulset") {
        ("StatefulSet", statefulset)
    } else if let Some(pod) = non_empty_label(alert, "pod") {
        ("Deployment", pod)
    } else {
        return Err(RouteError::MissingTargetLabels);
    };

    Ok(TargetResource {
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.clone(),
        container: alert.labels.get("container").cloned(),
    })
}

fn non_empty_label<'a>(alert: &'a AlertmanagerAlert, key: &str) -> Option<&'a str> {
    alert
        .labels
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}
