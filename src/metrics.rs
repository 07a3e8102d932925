//! Prometheus metrics for the intake handler and the controllers.
//!
//! Counters live in the process-wide default registry; the operator binary
//! serves them as text on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

/// Total alerts received from Alertmanager, by alert name and severity.
pub static ALERTS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "heal8s_alerts_received_total",
        "Total number of alerts received from Alertmanager",
        &["alertname", "severity"]
    )
    .expect("metric registration")
});

/// Alerts skipped before a Remediation was created (deduplicated or
/// filtered), by alert name and skip reason.
pub static ALERTS_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "heal8s_alerts_skipped_total",
        "Total number of alerts skipped",
        &["alertname", "reason"]
    )
    .expect("metric registration")
});

/// Remediation records created, by action, target kind and strategy mode.
pub static REMEDIATIONS_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "heal8s_remediations_created_total",
        "Total number of Remediation records created",
        &["action_type", "target_kind", "mode"]
    )
    .expect("metric registration")
});

/// Remediations that reached Succeeded.
pub static REMEDIATIONS_SUCCEEDED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "heal8s_remediations_succeeded_total",
        "Total number of successful remediations",
        &["action_type", "target_kind", "mode"]
    )
    .expect("metric registration")
});

/// Remediations that reached Failed, by failure reason.
pub static REMEDIATIONS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "heal8s_remediations_failed_total",
        "Total number of failed remediations",
        &["action_type", "target_kind", "reason"]
    )
    .expect("metric registration")
});

/// Time from record creation to a terminal phase.
pub static REMEDIATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "heal8s_remediation_duration_seconds",
        "Time from remediation creation to resolution",
        &["action_type", "phase"],
        vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
    )
    .expect("metric registration")
});

/// Phase transitions observed by the lifecycle controller.
pub static PHASE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "heal8s_remediation_phase_transitions_total",
        "Total number of remediation phase transitions",
        &["from_phase", "to_phase"]
    )
    .expect("metric registration")
});

/// Render the default registry in the Prometheus text format.
#[must_use]
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
