//! Alertmanager webhook payload types.
//!
//! These mirror the version-4 notification body Alertmanager POSTs to
//! webhook receivers. Only the labels the intake path actually reads get
//! accessors; everything else rides along in the maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level webhook payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerPayload {
    /// Version of the payload format
    #[serde(default)]
    pub version: String,
    /// Receiver that matched this alert
    #[serde(default)]
    pub receiver: String,
    /// "firing" or "resolved" for the group
    pub status: String,
    /// Unique identifier for this group of alerts
    #[serde(default)]
    pub group_key: String,
    /// Labels common to all alerts in this group
    #[serde(default)]
    pub group_labels: HashMap<String, String>,
    /// Labels common to all alerts
    #[serde(default)]
    pub common_labels: HashMap<String, String>,
    /// Annotations common to all alerts
    #[serde(default)]
    pub common_annotations: HashMap<String, String>,
    /// External URL of the Alertmanager
    #[serde(default)]
    pub external_url: String,
    /// Alerts in this notification
    pub alerts: Vec<AlertmanagerAlert>,
}

/// Individual alert inside a webhook payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// "firing" or "resolved"
    pub status: String,
    /// Alert labels
    pub labels: HashMap<String, String>,
    /// Alert annotations
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// When the alert started firing
    pub starts_at: DateTime<Utc>,
    /// When the alert resolved, if it did
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// URL of the generating rule
    #[serde(default)]
    pub generator_url: String,
    /// Unique fingerprint for this alert instance
    #[serde(default)]
    pub fingerprint: String,
}

const STATUS_FIRING: &str = "firing";

impl AlertmanagerAlert {
    fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// The alertname label, or "unknown" for a label-less alert.
    #[must_use]
    pub fn name(&self) -> &str {
        self.label("alertname").unwrap_or("unknown")
    }

    /// The severity label, or "unknown" when absent.
    #[must_use]
    pub fn severity(&self) -> &str {
        self.label("severity").unwrap_or("unknown")
    }

    /// Whether the alert is still firing (as opposed to resolved).
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.status == STATUS_FIRING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": "4",
        "receiver": "heal8s",
        "status": "firing",
        "groupKey": "{}:{alertname=\"KubePodOOMKilled\"}",
        "groupLabels": {"alertname": "KubePodOOMKilled"},
        "commonLabels": {"alertname": "KubePodOOMKilled", "severity": "critical"},
        "commonAnnotations": {},
        "externalURL": "http://alertmanager:9093",
        "alerts": [
            {
                "status": "firing",
                "labels": {
                    "alertname": "KubePodOOMKilled",
                    "namespace": "default",
                    "deployment": "test-app",
                    "container": "app",
                    "severity": "critical"
                },
                "annotations": {"summary": "Pod OOMKilled"},
                "startsAt": "2026-03-01T10:15:00Z",
                "endsAt": "0001-01-01T00:00:00Z",
                "generatorURL": "http://prometheus/graph",
                "fingerprint": "abc"
            }
        ]
    }"#;

    #[test]
    fn test_parse_sample_payload() {
        let payload: AlertmanagerPayload = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(payload.status, "firing");
        assert_eq!(payload.alerts.len(), 1);

        let alert = &payload.alerts[0];
        assert_eq!(alert.name(), "KubePodOOMKilled");
        assert_eq!(alert.severity(), "critical");
        assert!(alert.is_firing());
        assert_eq!(alert.fingerprint, "abc");
        assert_eq!(alert.starts_at.to_rfc3339(), "2026-03-01T10:15:00+00:00");
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let minimal = r#"{
            "status": "firing",
            "alerts": [{
                "status": "firing",
                "labels": {"alertname": "X"},
                "startsAt": "2026-03-01T10:15:00Z"
            }]
        }"#;
        let payload: AlertmanagerPayload = serde_json::from_str(minimal).unwrap();
        assert!(payload.alerts[0].fingerprint.is_empty());
        assert!(payload.alerts[0].annotations.is_empty());
    }
}
