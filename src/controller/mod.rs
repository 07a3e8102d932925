//! Remediation lifecycle controller.
//!
//! Level-triggered reconciler over `Remediation` records. Every record
//! moves through the phase machine:
//!
//! ```text
//! (empty) -> Pending -> Analyzing -+- Direct, no approval -> Applying -> Succeeded | Failed
//!                                  |
//!                                  +- otherwise -> Pending (parked for the GitOps worker)
//!                                                    -> PRCreated -> Expired on TTL
//! ```
//!
//! Status writes go through `replace_status` so the API server enforces
//! optimistic concurrency; a 409 means another writer won and the update
//! is dropped, the next reconcile catches up from the winner's state.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::api::PostParams;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::config::parse_duration;
use crate::crds::{
    Remediation, RemediationCondition, RemediationPhase, RemediationStatus, StrategyMode,
};
use crate::dashboard::EventLog;
use crate::error::{Error, Result};
use crate::metrics;
use crate::remediate::{apply_action, Workload, WorkloadKind};

/// Reason written while a record waits for the GitOps worker. Also used
/// to recognize a parked record on a later reconcile.
const WAITING_FOR_GITOPS_REASON: &str = "Waiting for GitHub App service to create PR";

const APPLYING_REQUEUE: Duration = Duration::from_secs(30);
const PR_CREATED_REQUEUE: Duration = Duration::from_secs(60);
const ERROR_REQUEUE: Duration = Duration::from_secs(15);

/// Shared context for the reconciler.
pub struct Context {
    pub client: Client,
    pub namespace: String,
    pub events: Arc<EventLog>,
}

/// Run the controller until the watch stream ends.
#[instrument(skip(client, events), fields(namespace = %namespace))]
pub async fn run_remediation_controller(
    client: Client,
    namespace: String,
    events: Arc<EventLog>,
) -> Result<()> {
    info!("starting Remediation controller");

    let api: Api<Remediation> = Api::namespaced(client.clone(), &namespace);
    let context = Arc::new(Context {
        client,
        namespace: namespace.clone(),
        events,
    });

    Controller::new(api, watcher::Config::default().any_semantic())
        .run(reconcile, error_policy, context)
        .for_each(|result| {
            let span = tracing::info_span!("reconciliation_result");
            async move {
                match result {
                    Ok(obj) => debug!(resource = ?obj, "reconciliation successful"),
                    Err(err) => error!(error = ?err, "reconciliation error"),
                }
            }
            .instrument(span)
        })
        .await;

    info!("Remediation controller shutting down");
    Ok(())
}

fn error_policy(_rem: Arc<Remediation>, err: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %err, "reconciliation failed, requeueing");
    Action::requeue(ERROR_REQUEUE)
}

#[instrument(skip(rem, ctx), fields(name = %rem.name_any(), namespace = %ctx.namespace, phase = ?rem.phase()))]
async fn reconcile(rem: Arc<Remediation>, ctx: Arc<Context>) -> Result<Action> {
    match rem.phase() {
        None => handle_new(&rem, &ctx).await,
        Some(RemediationPhase::Pending) => handle_pending(&rem, &ctx).await,
        Some(RemediationPhase::Analyzing) => handle_analyzing(&rem, &ctx).await,
        // Transient during direct execution; also the parking phase for
        // externally-applied remediations.
        Some(RemediationPhase::Applying) => Ok(Action::requeue(APPLYING_REQUEUE)),
        Some(RemediationPhase::PRCreated) => handle_pr_created(&rem, &ctx).await,
        Some(phase) if phase.is_terminal() => Ok(Action::await_change()),
        Some(phase) => {
            warn!(%phase, "unknown phase, ignoring");
            Ok(Action::await_change())
        }
    }
}

/// (empty) -> Pending with an AlertReceived condition.
async fn handle_new(rem: &Remediation, ctx: &Context) -> Result<Action> {
    info!("handling new remediation");

    let mut status = current_status(rem);
    record_transition(&status.phase, RemediationPhase::Pending);
    status.phase = Some(RemediationPhase::Pending);
    status.reason = Some("Remediation created, waiting for processing".to_string());
    status.last_update_time = Some(Utc::now().to_rfc3339());
    status.set_condition(condition(
        rem,
        "AlertReceived",
        "AlertReceived",
        &format!(
            "Alert {} received from {}",
            rem.spec.alert.name, rem.spec.alert.source
        ),
    ));

    write_status(rem, ctx, status).await?;
    Ok(Action::requeue(Duration::ZERO))
}

/// Pending -> Analyzing once the target resolves, unless the record is
/// parked for the GitOps worker.
async fn handle_pending(rem: &Remediation, ctx: &Context) -> Result<Action> {
    // Parked records are advanced by the GitOps worker's status update,
    // not by us; re-validating the target here would ping-pong the phase.
    if rem
        .status
        .as_ref()
        .and_then(|s| s.reason.as_deref())
        .is_some_and(|reason| reason == WAITING_FOR_GITOPS_REASON)
    {
        return Ok(Action::await_change());
    }

    info!("handling pending remediation");

    let kind = match WorkloadKind::from_str(&rem.spec.target.kind) {
        Ok(kind) => kind,
        Err(err) => {
            return fail(rem, ctx, &err.to_string(), "unsupported-kind").await;
        }
    };

    match Workload::get(
        ctx.client.clone(),
        kind,
        &rem.spec.target.namespace,
        &rem.spec.target.name,
    )
    .await
    {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            let reason = format!(
                "Target resource not found: {}/{}",
                rem.spec.target.namespace, rem.spec.target.name
            );
            return fail(rem, ctx, &reason, "target-not-found").await;
        }
        Err(err) => return Err(err.into()),
    }

    let mut status = current_status(rem);
    record_transition(&status.phase, RemediationPhase::Analyzing);
    status.phase = Some(RemediationPhase::Analyzing);
    status.reason = Some("Analyzing target resource and calculating remediation".to_string());
    status.last_update_time = Some(Utc::now().to_rfc3339());

    write_status(rem, ctx, status).await?;
    Ok(Action::requeue(Duration::ZERO))
}

/// Analyzing -> direct apply, or park for the GitOps worker.
async fn handle_analyzing(rem: &Remediation, ctx: &Context) -> Result<Action> {
    info!("handling analyzing remediation");

    if rem.spec.strategy.mode == StrategyMode::Direct && !rem.spec.strategy.require_approval {
        return handle_direct_apply(rem, ctx).await;
    }

    let mut status = current_status(rem);
    record_transition(&status.phase, RemediationPhase::Pending);
    status.phase = Some(RemediationPhase::Pending);
    status.reason = Some(WAITING_FOR_GITOPS_REASON.to_string());
    status.last_update_time = Some(Utc::now().to_rfc3339());

    write_status(rem, ctx, status).await?;
    // The GitOps worker advances the record; no active requeue.
    Ok(Action::await_change())
}

/// The Direct path: load the target, patch it in memory, persist the
/// mutation, then record the outcome.
async fn handle_direct_apply(rem: &Remediation, ctx: &Context) -> Result<Action> {
    info!("applying direct remediation");

    let kind = match WorkloadKind::from_str(&rem.spec.target.kind) {
        Ok(kind) => kind,
        Err(err) => return fail(rem, ctx, &err.to_string(), "unsupported-kind").await,
    };

    let mut workload = match Workload::get(
        ctx.client.clone(),
        kind,
        &rem.spec.target.namespace,
        &rem.spec.target.name,
    )
    .await
    {
        Ok(workload) => workload,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            let reason = format!("Failed to get target: {}", ae.message);
            return fail(rem, ctx, &reason, "target-not-found").await;
        }
        Err(err) => return Err(err.into()),
    };

    let details = match apply_action(
        &mut workload,
        &rem.spec.action,
        rem.spec.target.container.as_deref(),
    ) {
        Ok(details) => details,
        Err(err) => {
            let reason = format!("Failed to calculate remediation: {err}");
            return fail(rem, ctx, &reason, "patch-failed").await;
        }
    };

    // Attempts counts direct applies; bump it before touching the target
    // so a crash mid-apply is still visible.
    let mut status = current_status(rem);
    record_transition(&status.phase, RemediationPhase::Applying);
    status.phase = Some(RemediationPhase::Applying);
    status.reason = Some("Applying remediation directly to cluster".to_string());
    status.attempts += 1;
    status.last_update_time = Some(Utc::now().to_rfc3339());

    let Some(persisted) = write_status(rem, ctx, status.clone()).await? else {
        // Lost the write; let the next reconcile re-run the apply.
        return Ok(Action::requeue(Duration::ZERO));
    };

    if let Err(err) = workload
        .update(ctx.client.clone(), &rem.spec.target.namespace)
        .await
    {
        let reason = format!("Failed to apply remediation: {err}");
        return fail(&persisted, ctx, &reason, "apply-failed").await;
    }

    let applied = Utc::now().to_rfc3339();
    record_transition(&status.phase, RemediationPhase::Succeeded);
    status.phase = Some(RemediationPhase::Succeeded);
    status.reason = Some("Remediation applied successfully".to_string());
    status.applied_at = Some(applied.clone());
    status.resolved_at = Some(applied.clone());
    status.last_update_time = Some(applied);
    status.set_condition(condition(
        rem,
        "Applied",
        "RemediationApplied",
        "Remediation applied directly to cluster",
    ));

    write_status(&persisted, ctx, status).await?;

    let action = rem.spec.action.action_type.to_string();
    metrics::REMEDIATIONS_SUCCEEDED
        .with_label_values(&[&action, &rem.spec.target.kind, "Direct"])
        .inc();
    observe_duration(rem, RemediationPhase::Succeeded);
    ctx.events.record_remediation_applied(
        &rem.name_any(),
        &target_display(rem),
        &action,
        &details,
    );

    info!(%details, "remediation applied successfully");
    Ok(Action::await_change())
}

/// PRCreated: expire past the TTL, otherwise poll slowly while the PR is
/// reviewed and merged out of band.
async fn handle_pr_created(rem: &Remediation, ctx: &Context) -> Result<Action> {
    if let Some(ttl) = rem.spec.strategy.ttl.as_deref() {
        let created = rem
            .meta()
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .ok_or(Error::MissingObjectKey("creationTimestamp"))?;

        if ttl_exceeded(ttl, created, Utc::now()) {
            info!(ttl, "remediation TTL exceeded, expiring");

            let mut status = current_status(rem);
            record_transition(&status.phase, RemediationPhase::Expired);
            status.phase = Some(RemediationPhase::Expired);
            status.reason = Some("Remediation TTL exceeded".to_string());
            let now = Utc::now().to_rfc3339();
            status.resolved_at = Some(now.clone());
            status.last_update_time = Some(now);

            write_status(rem, ctx, status).await?;
            observe_duration(rem, RemediationPhase::Expired);
            return Ok(Action::await_change());
        }
    }

    Ok(Action::requeue(PR_CREATED_REQUEUE))
}

/// Move the record to Failed with the given reason. Failed is terminal.
async fn fail(
    rem: &Remediation,
    ctx: &Context,
    reason: &str,
    metric_reason: &'static str,
) -> Result<Action> {
    info!(reason, "marking remediation failed");

    let mut status = current_status(rem);
    record_transition(&status.phase, RemediationPhase::Failed);
    status.phase = Some(RemediationPhase::Failed);
    status.reason = Some(reason.to_string());
    let now = Utc::now().to_rfc3339();
    status.resolved_at = Some(now.clone());
    status.last_update_time = Some(now);
    status.set_condition(condition(rem, "Failed", "RemediationFailed", reason));

    write_status(rem, ctx, status).await?;

    let action = rem.spec.action.action_type.to_string();
    metrics::REMEDIATIONS_FAILED
        .with_label_values(&[&action, &rem.spec.target.kind, metric_reason])
        .inc();
    observe_duration(rem, RemediationPhase::Failed);
    ctx.events
        .record_remediation_failed(&rem.name_any(), &target_display(rem), &action, reason);

    Ok(Action::await_change())
}

/// Write the status through `replace_status`. Returns the refreshed
/// object (carrying the new resourceVersion, for follow-up writes), or
/// `None` when the write lost an optimistic-concurrency race and was
/// dropped.
async fn write_status(
    rem: &Remediation,
    ctx: &Context,
    status: RemediationStatus,
) -> Result<Option<Remediation>> {
    let api: Api<Remediation> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    let mut updated = rem.clone();
    updated.status = Some(status);

    match api
        .replace_status(
            &rem.name_any(),
            &PostParams::default(),
            serde_json::to_vec(&updated)?,
        )
        .await
    {
        Ok(persisted) => Ok(Some(persisted)),
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            debug!("status write conflicted, dropping update");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn current_status(rem: &Remediation) -> RemediationStatus {
    rem.status.clone().unwrap_or_default()
}

fn condition(rem: &Remediation, type_: &str, reason: &str, message: &str) -> RemediationCondition {
    RemediationCondition {
        condition_type: type_.to_string(),
        status: "True".to_string(),
        observed_generation: rem.meta().generation,
        last_transition_time: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        message: message.to_string(),
    }
}

fn record_transition(from: &Option<RemediationPhase>, to: RemediationPhase) {
    let from = from.map_or_else(|| "none".to_string(), |p| p.to_string());
    metrics::PHASE_TRANSITIONS
        .with_label_values(&[&from, &to.to_string()])
        .inc();
}

fn observe_duration(rem: &Remediation, phase: RemediationPhase) {
    if let Some(created) = rem.meta().creation_timestamp.as_ref() {
        let elapsed = (Utc::now() - created.0).num_seconds();
        if elapsed >= 0 {
            #[allow(clippy::cast_precision_loss)]
            metrics::REMEDIATION_DURATION
                .with_label_values(&[&rem.spec.action.action_type.to_string(), &phase.to_string()])
                .observe(elapsed as f64);
        }
    }
}

fn target_display(rem: &Remediation) -> String {
    format!(
        "{}/{}/{}",
        rem.spec.target.kind, rem.spec.target.namespace, rem.spec.target.name
    )
}

/// True once the record's age exceeds its TTL. Malformed TTL strings are
/// ignored rather than expiring the record.
fn ttl_exceeded(ttl: &str, created: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match parse_duration(ttl) {
        Ok(ttl) => {
            let age = now - created;
            age.num_seconds() > i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ttl_exceeded() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();

        let two_hours_later = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert!(ttl_exceeded("1h", created, two_hours_later));

        let thirty_minutes_later = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap();
        assert!(!ttl_exceeded("1h", created, thirty_minutes_later));
    }

    #[test]
    fn test_ttl_boundary_is_exclusive() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let exactly_one_hour = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();
        assert!(!ttl_exceeded("1h", created, exactly_one_hour));
    }

    #[test]
    fn test_malformed_ttl_never_expires() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let much_later = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        assert!(!ttl_exceeded("eventually", created, much_later));
    }
}
