//! Alert intake: the Alertmanager webhook endpoint.
//!
//! Parses the webhook payload, filters non-firing and duplicate alerts,
//! then dispatches a task per surviving alert that routes it and creates
//! the `Remediation` record. The HTTP response acknowledges receipt once
//! every alert has been dispatched; per-alert failures are logged, never
//! returned.

pub mod dedup;
pub mod payload;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::crds::Remediation;
use crate::dashboard::EventLog;
use crate::metrics;
use crate::remediate::RouteTable;

use dedup::AlertDeduplicator;
use payload::{AlertmanagerAlert, AlertmanagerPayload};

pub const ALERT_LABEL: &str = "heal8s.io/alert";
pub const TARGET_LABEL: &str = "heal8s.io/target";
pub const FINGERPRINT_LABEL: &str = "heal8s.io/fingerprint";

/// Shared state for the intake handler.
pub struct IntakeState {
    client: Client,
    dedup: Arc<AlertDeduplicator>,
    routes: RouteTable,
    events: Arc<EventLog>,
}

impl IntakeState {
    #[must_use]
    pub fn new(client: Client, events: Arc<EventLog>) -> Arc<Self> {
        let dedup = AlertDeduplicator::new(Duration::hours(1));
        dedup.start_reaper();
        Arc::new(Self {
            client,
            dedup,
            routes: RouteTable::default(),
            events,
        })
    }
}

/// Build the webhook router. Non-POST methods on the endpoint get a 405
/// from the method router.
pub fn build_webhook_router(state: Arc<IntakeState>) -> Router {
    Router::new()
        .route("/webhook/alertmanager", post(handle_webhook))
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<Arc<IntakeState>>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), StatusCode> {
    let payload: AlertmanagerPayload =
        serde_json::from_slice(&body).map_err(|err| {
            warn!(error = %err, "rejected malformed webhook payload");
            StatusCode::BAD_REQUEST
        })?;

    info!(
        receiver = %payload.receiver,
        status = %payload.status,
        alert_count = payload.alerts.len(),
        "received Alertmanager webhook"
    );

    for alert in payload.alerts {
        let alertname = alert.name().to_string();
        metrics::ALERTS_RECEIVED
            .with_label_values(&[&alertname, alert.severity()])
            .inc();

        if !alert.is_firing() {
            info!(%alertname, status = %alert.status, "skipping non-firing alert");
            metrics::ALERTS_SKIPPED
                .with_label_values(&[&alertname, "not-firing"])
                .inc();
            continue;
        }

        if !state.dedup.should_process(&alert.fingerprint, alert.starts_at) {
            info!(%alertname, fingerprint = %alert.fingerprint, "skipping duplicate alert");
            metrics::ALERTS_SKIPPED
                .with_label_values(&[&alertname, "duplicate"])
                .inc();
            continue;
        }

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            process_alert(&state, alert).await;
        });
    }

    Ok((StatusCode::OK, "OK"))
}

/// Route one alert and create its `Remediation` record. The record name
/// is derived from (alertname, startsAt), so retries of the same firing
/// collapse onto the same record.
#[instrument(skip(state, alert), fields(alertname = %alert.name(), fingerprint = %alert.fingerprint))]
async fn process_alert(state: &IntakeState, alert: AlertmanagerAlert) {
    let mut spec = match state.routes.route(&alert) {
        Ok(spec) => spec,
        Err(err) => {
            error!(error = %err, "failed to route alert");
            return;
        }
    };

    spec.alert.payload = serde_json::to_string(&alert).ok();
    spec.alert.alert_id = Some(format!("{}-{}", alert.fingerprint, alert.starts_at.timestamp()));

    let name = remediation_name(alert.name(), alert.starts_at);
    let namespace = spec.target.namespace.clone();
    let api: Api<Remediation> = Api::namespaced(state.client.clone(), &namespace);

    match api.get_opt(&name).await {
        Ok(Some(_)) => {
            info!(%name, "remediation already exists, skipping");
            return;
        }
        Ok(None) => {}
        Err(err) => {
            error!(error = %err, %name, "failed to check for existing remediation");
            return;
        }
    }

    let target_kind = spec.target.kind.clone();
    let action = spec.action.action_type;
    let mode = spec.strategy.mode;
    let target_display = format!("{}/{}/{}", target_kind, namespace, spec.target.name);

    let remediation = Remediation {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.clone()),
            labels: Some(BTreeMap::from([
                (ALERT_LABEL.to_string(), spec.alert.name.clone()),
                (TARGET_LABEL.to_string(), spec.target.name.clone()),
                (FINGERPRINT_LABEL.to_string(), spec.alert.fingerprint.clone()),
            ])),
            ..Default::default()
        },
        spec,
        status: None,
    };

    if let Err(err) = api.create(&PostParams::default(), &remediation).await {
        error!(error = %err, %name, "failed to create Remediation");
        return;
    }

    metrics::REMEDIATIONS_CREATED
        .with_label_values(&[
            &action.to_string(),
            &target_kind,
            &match mode {
                crate::crds::StrategyMode::GitOps => "GitOps".to_string(),
                crate::crds::StrategyMode::Direct => "Direct".to_string(),
            },
        ])
        .inc();

    state
        .events
        .record_alert_received(alert.name(), &target_display, &action.to_string());

    info!(%name, %namespace, action = %action, "created Remediation");
}

/// Deterministic record name for an alert firing. Kubernetes names must
/// be lowercase DNS labels, so the alert name is lowercased.
#[must_use]
pub fn remediation_name(alertname: &str, starts_at: DateTime<Utc>) -> String {
    format!(
        "rem-{}-{}",
        alertname.to_lowercase(),
        starts_at.format("%Y%m%d-%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_remediation_name_is_deterministic() {
        let starts_at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();
        let first = remediation_name("KubePodOOMKilled", starts_at);
        let second = remediation_name("KubePodOOMKilled", starts_at);
        assert_eq!(first, second);
        assert_eq!(first, "rem-kubepodoomkilled-20260301-101500");
    }

    #[test]
    fn test_remediation_name_varies_with_start_time() {
        let first = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 1).unwrap();
        assert_ne!(
            remediation_name("KubePodOOMKilled", first),
            remediation_name("KubePodOOMKilled", second)
        );
    }
}
