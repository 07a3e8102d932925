//! Operator event dashboard.
//!
//! A small in-memory log of alerts received and remediations applied or
//! failed, served as an HTML table and as JSON. Events are ring-buffered
//! (500 entries) under a read/write lock; nothing here is durable.

use axum::extract::State;
use axum::response::{Html, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

const MAX_EVENTS: usize = 500;

/// One dashboard event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub alert: String,
    pub target: String,
    pub action: String,
    pub details: String,
    pub phase: String,
}

/// Shared ring buffer of events, newest last internally; both endpoints
/// serve newest first.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<VecDeque<Event>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: Event) {
        let mut events = self.events.write().expect("event log lock poisoned");
        if events.len() == MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Record an alert accepted by the intake handler.
    pub fn record_alert_received(&self, alert: &str, target: &str, action: &str) {
        self.push(Event {
            time: Utc::now(),
            event_type: "alert_received",
            alert: alert.to_string(),
            target: target.to_string(),
            action: action.to_string(),
            details: String::new(),
            phase: "\u{2014}".to_string(),
        });
    }

    /// Record a remediation that changed the target.
    pub fn record_remediation_applied(
        &self,
        remediation: &str,
        target: &str,
        action: &str,
        details: &str,
    ) {
        self.push(Event {
            time: Utc::now(),
            event_type: "remediation_applied",
            alert: remediation.to_string(),
            target: target.to_string(),
            action: action.to_string(),
            details: details.to_string(),
            phase: "Succeeded".to_string(),
        });
    }

    /// Record a remediation that reached Failed.
    pub fn record_remediation_failed(
        &self,
        remediation: &str,
        target: &str,
        action: &str,
        reason: &str,
    ) {
        self.push(Event {
            time: Utc::now(),
            event_type: "remediation_failed",
            alert: remediation.to_string(),
            target: target.to_string(),
            action: action.to_string(),
            details: reason.to_string(),
            phase: "Failed".to_string(),
        });
    }

    /// Snapshot of events, newest first.
    #[must_use]
    pub fn events_newest_first(&self) -> Vec<Event> {
        let events = self.events.read().expect("event log lock poisoned");
        events.iter().rev().cloned().collect()
    }
}

/// `GET /api/events`
pub async fn events_json(State(log): State<Arc<EventLog>>) -> Json<Vec<Event>> {
    Json(log.events_newest_first())
}

/// `GET /`, `/dashboard`, `/index.html`
pub async fn events_html(State(log): State<Arc<EventLog>>) -> Html<String> {
    let mut page = String::from(HTML_HEADER);
    for event in log.events_newest_first() {
        page.push_str(&render_row(&event));
    }
    page.push_str(HTML_FOOTER);
    Html(page)
}

fn render_row(event: &Event) -> String {
    let row_class = match event.event_type {
        "remediation_applied" => "success",
        "remediation_failed" => "failed",
        "alert_received" => "alert",
        _ => "",
    };
    format!(
        "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
        row_class,
        event.time.format("%Y-%m-%d %H:%M:%S"),
        event.event_type,
        escape(&event.alert),
        escape(&event.target),
        escape(&event.action),
        escape(&event.details),
        escape(&event.phase),
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

const HTML_HEADER: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>heal8s &mdash; Events</title>
  <style>
    body { font-family: system-ui, sans-serif; margin: 1rem; background: #1a1a2e; color: #eee; }
    h1 { color: #eee; }
    table { border-collapse: collapse; width: 100%; }
    th, td { border: 1px solid #444; padding: 0.5rem 0.75rem; text-align: left; }
    th { background: #16213e; }
    tr.success { background: #0d3320; }
    tr.failed { background: #331a0d; }
    tr.alert { background: #1a1a3e; }
    a { color: #7eb8da; }
  </style>
</head>
<body>
  <h1>heal8s &mdash; Events &amp; changes</h1>
  <p>Alerts received and remediations applied (in-memory, newest first).</p>
  <table>
    <thead><tr><th>Time (UTC)</th><th>Type</th><th>Alert / Remediation</th><th>Target</th><th>Action</th><th>Details</th><th>Phase</th></tr></thead>
    <tbody>
"#;

const HTML_FOOTER: &str = r#"    </tbody>
  </table>
  <p><a href="/api/events">JSON</a></p>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_newest_first() {
        let log = EventLog::new();
        log.record_alert_received("KubePodOOMKilled", "Deployment/default/a", "IncreaseMemory");
        log.record_remediation_applied("rem-a", "Deployment/default/a", "IncreaseMemory", "ok");

        let events = log.events_newest_first();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "remediation_applied");
        assert_eq!(events[1].event_type, "alert_received");
    }

    #[test]
    fn test_ring_buffer_caps_at_500() {
        let log = EventLog::new();
        for i in 0..600 {
            log.record_alert_received(&format!("Alert{i}"), "t", "a");
        }
        let events = log.events_newest_first();
        assert_eq!(events.len(), 500);
        // Oldest 100 were dropped
        assert_eq!(events[0].alert, "Alert599");
        assert_eq!(events[499].alert, "Alert100");
    }

    #[test]
    fn test_html_rows_escape_markup() {
        let log = EventLog::new();
        log.record_remediation_failed("rem", "<script>", "Scale", "a & b");
        let events = log.events_newest_first();
        let row = render_row(&events[0]);
        assert!(row.contains("&lt;script&gt;"));
        assert!(row.contains("a &amp; b"));
        assert!(row.contains("class=\"failed\""));
    }
}
