//! The GitOps worker loop.
//!
//! On a fixed poll interval the processor lists remediations parked in
//! Pending with GitHub enabled, and for each one fetches the manifest,
//! applies the patch, pushes a head branch with the mutated file and
//! opens a pull request. Records are handled sequentially to keep GitHub
//! rate-limit pressure low; one record failing does not abort the batch.

use chrono::{DateTime, Utc};
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::crds::{ActionType, GitHubSpec, Remediation, RemediationPhase};
use crate::error::Result;
use crate::gitops::github::GitHubClient;
use crate::gitops::manifest::{decode_workload, encode_workload, interpolate_path};
use crate::remediate::apply_action;

const DEFAULT_PR_TITLE_TEMPLATE: &str = "[heal8s] {action}: {target} in {namespace}";

pub struct Processor {
    client: Client,
    github: GitHubClient,
    namespace: String,
    batch_size: usize,
}

impl Processor {
    #[must_use]
    pub fn new(client: Client, github: GitHubClient, namespace: String, batch_size: usize) -> Self {
        Self {
            client,
            github,
            namespace,
            batch_size,
        }
    }

    /// Poll until the task is cancelled from outside.
    pub async fn run(&self, poll_interval: Duration) -> Result<()> {
        info!(?poll_interval, namespace = %self.namespace, "starting remediation processor");

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.process_pending().await {
                error!(error = %err, "failed to process pending remediations");
            }
        }
    }

    /// One poll cycle: list and process up to `batch_size` records.
    pub async fn process_pending(&self) -> Result<()> {
        let api: Api<Remediation> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = api.list(&ListParams::default()).await?;

        let pending: Vec<_> = list
            .items
            .into_iter()
            .filter(Remediation::awaits_gitops)
            .take(self.batch_size)
            .collect();

        if pending.is_empty() {
            return Ok(());
        }
        info!(count = pending.len(), "found pending remediations");

        for remediation in pending {
            if let Err(err) = self.process_remediation(&api, &remediation).await {
                error!(
                    error = %err,
                    name = %remediation.name_any(),
                    namespace = %self.namespace,
                    "failed to process remediation"
                );
                // Continue with the rest of the batch.
            }
        }

        Ok(())
    }

    /// Drive one record from Pending to PRCreated (or Failed).
    #[instrument(skip(self, api, remediation), fields(name = %remediation.name_any()))]
    async fn process_remediation(
        &self,
        api: &Api<Remediation>,
        remediation: &Remediation,
    ) -> Result<()> {
        info!("processing remediation");

        let Some(gh) = remediation.spec.github.as_ref() else {
            return self
                .update_status_failed(api, remediation, "GitHub config is missing")
                .await;
        };

        let manifest_path = interpolate_path(&gh.manifest_path, remediation);

        info!(path = %manifest_path, "fetching manifest from GitHub");
        let manifest = match self
            .github
            .fetch_file(&gh.owner, &gh.repo, &manifest_path, &gh.base_branch)
            .await
        {
            Ok(Some(file)) => file,
            Ok(None) => {
                let reason = format!("Failed to fetch manifest: {manifest_path} not found");
                return self.update_status_failed(api, remediation, &reason).await;
            }
            Err(err) => {
                let reason = format!("Failed to fetch manifest: {err}");
                return self.update_status_failed(api, remediation, &reason).await;
            }
        };

        let mut workload = match decode_workload(&manifest.content) {
            Ok(workload) => workload,
            Err(err) => {
                let reason = format!("Failed to patch manifest: {err}");
                return self.update_status_failed(api, remediation, &reason).await;
            }
        };

        let change = match apply_action(
            &mut workload,
            &remediation.spec.action,
            remediation.spec.target.container.as_deref(),
        ) {
            Ok(change) => change,
            Err(err) => {
                let reason = format!("Failed to patch manifest: {err}");
                return self.update_status_failed(api, remediation, &reason).await;
            }
        };
        debug!(%change, "patched manifest");

        let patched = match encode_workload(&workload) {
            Ok(patched) => patched,
            Err(err) => {
                let reason = format!("Failed to patch manifest: {err}");
                return self.update_status_failed(api, remediation, &reason).await;
            }
        };

        let head_branch = branch_name(remediation);
        let commit_message = format!(
            "heal8s: {} for {}/{}",
            remediation.spec.action.action_type,
            remediation.spec.target.namespace,
            remediation.spec.target.name
        );

        let base_sha = match self
            .github
            .branch_sha(&gh.owner, &gh.repo, &gh.base_branch)
            .await
        {
            Ok(sha) => sha,
            Err(err) => {
                let reason = format!("Failed to create branch: {err}");
                return self.update_status_failed(api, remediation, &reason).await;
            }
        };

        if let Err(err) = self
            .github
            .ensure_branch(&gh.owner, &gh.repo, &head_branch, &base_sha)
            .await
        {
            let reason = format!("Failed to create branch: {err}");
            return self.update_status_failed(api, remediation, &reason).await;
        }

        // Re-read the file from the head branch for its blob SHA; a
        // pre-existing head branch may not match the base tip.
        let head_file_sha = match self
            .github
            .fetch_file(&gh.owner, &gh.repo, &manifest_path, &head_branch)
            .await
        {
            Ok(file) => file.map(|f| f.sha),
            Err(err) => {
                let reason = format!("Failed to update file: {err}");
                return self.update_status_failed(api, remediation, &reason).await;
            }
        };

        let commit_sha = match self
            .github
            .put_file(
                &gh.owner,
                &gh.repo,
                &manifest_path,
                &head_branch,
                &commit_message,
                &patched,
                head_file_sha.as_deref(),
            )
            .await
        {
            Ok(sha) => sha,
            Err(err) => {
                let reason = format!("Failed to update file: {err}");
                return self.update_status_failed(api, remediation, &reason).await;
            }
        };

        info!(branch = %head_branch, "creating GitHub PR");
        let title = pr_title(remediation, gh);
        let body = pr_body(remediation);
        let (pr_number, pr_url) = match self
            .github
            .open_pull_request(
                &gh.owner,
                &gh.repo,
                &title,
                &body,
                &head_branch,
                &gh.base_branch,
                &gh.pr_labels,
            )
            .await
        {
            Ok(result) => result,
            Err(err) => {
                let reason = format!("Failed to create PR: {err}");
                return self.update_status_failed(api, remediation, &reason).await;
            }
        };

        info!(pr_number, %pr_url, "PR created successfully");
        self.update_status_pr_created(api, remediation, pr_number, &pr_url, &commit_sha)
            .await
    }

    async fn update_status_pr_created(
        &self,
        api: &Api<Remediation>,
        remediation: &Remediation,
        pr_number: u64,
        pr_url: &str,
        commit_sha: &str,
    ) -> Result<()> {
        let mut status = remediation.status.clone().unwrap_or_default();
        status.phase = Some(RemediationPhase::PRCreated);
        status.reason = Some("GitHub PR created successfully".to_string());
        status.pr_number = Some(pr_number);
        status.pr_url = Some(pr_url.to_string());
        status.commit_sha = Some(commit_sha.to_string());
        status.last_update_time = Some(Utc::now().to_rfc3339());

        self.write_status(api, remediation, status).await
    }

    async fn update_status_failed(
        &self,
        api: &Api<Remediation>,
        remediation: &Remediation,
        reason: &str,
    ) -> Result<()> {
        warn!(reason, "marking remediation failed");

        let mut status = remediation.status.clone().unwrap_or_default();
        status.phase = Some(RemediationPhase::Failed);
        status.reason = Some(reason.to_string());
        let now = Utc::now().to_rfc3339();
        status.resolved_at = Some(now.clone());
        status.last_update_time = Some(now);

        self.write_status(api, remediation, status).await
    }

    /// Status write with the record's resourceVersion, so a concurrent
    /// controller transition (e.g. to Expired) wins over us instead of
    /// being silently reverted. Conflicts drop the write; the next poll
    /// re-lists and sees the new phase.
    async fn write_status(
        &self,
        api: &Api<Remediation>,
        remediation: &Remediation,
        status: crate::crds::RemediationStatus,
    ) -> Result<()> {
        let mut updated = remediation.clone();
        updated.status = Some(status);

        match api
            .replace_status(
                &remediation.name_any(),
                &PostParams::default(),
                serde_json::to_vec(&updated)?,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("status write conflicted, dropping update");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn creation_timestamp(remediation: &Remediation) -> DateTime<Utc> {
    remediation
        .meta()
        .creation_timestamp
        .as_ref()
        .map_or(DateTime::<Utc>::UNIX_EPOCH, |t| t.0)
}

/// Deterministic head branch for a record:
/// `heal8s/{action-lowercased}/{target}-{creationTimestamp}`.
#[must_use]
pub fn branch_name(remediation: &Remediation) -> String {
    format!(
        "heal8s/{}/{}-{}",
        remediation.spec.action.action_type.to_string().to_lowercase(),
        remediation.spec.target.name,
        creation_timestamp(remediation).format("%Y%m%d-%H%M%S")
    )
}

/// PR title from the template (or the default), with literal placeholder
/// substitution.
#[must_use]
pub fn pr_title(remediation: &Remediation, gh: &GitHubSpec) -> String {
    let template = gh
        .pr_title_template
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_PR_TITLE_TEMPLATE);

    template
        .replace("{action}", &remediation.spec.action.action_type.to_string())
        .replace("{target}", &remediation.spec.target.name)
        .replace("{namespace}", &remediation.spec.target.namespace)
        .replace("{alert}", &remediation.spec.alert.name)
}

/// Markdown PR body: metadata, an action-specific change list and a
/// review checklist.
#[must_use]
pub fn pr_body(remediation: &Remediation) -> String {
    let spec = &remediation.spec;
    let mut body = format!(
        "## heal8s Automatic Remediation\n\n\
         **Alert**: {alert}\n\
         **Severity**: {severity}\n\
         **Target**: {namespace}/{target} ({kind})\n\
         **Action**: {action}\n\n\
         ### Details\n\n\
         This PR was automatically generated in response to a {alert} alert in {namespace}.\n\n\
         **Fingerprint**: {fingerprint}\n\
         **Timestamp**: {timestamp}\n\n\
         ### Changes\n\n",
        alert = spec.alert.name,
        severity = spec.alert.severity,
        namespace = spec.target.namespace,
        target = spec.target.name,
        kind = spec.target.kind,
        action = spec.action.action_type,
        fingerprint = spec.alert.fingerprint,
        timestamp = creation_timestamp(remediation).to_rfc3339(),
    );

    match spec.action.action_type {
        ActionType::IncreaseMemory => {
            if let Some(pct) = spec.action.params.get("memoryIncreasePercent") {
                body.push_str(&format!("- Increase memory limits by {pct}%\n"));
            }
            if let Some(max) = spec.action.params.get("maxMemory") {
                body.push_str(&format!("- Maximum memory: {max}\n"));
            }
        }
        ActionType::ScaleUp => {
            if let Some(pct) = spec.action.params.get("scaleUpPercent") {
                body.push_str(&format!("- Scale up by {pct}%\n"));
            }
            if let Some(max) = spec.action.params.get("maxReplicas") {
                body.push_str(&format!("- Maximum replicas: {max}\n"));
            }
        }
        ActionType::RollbackImage => {
            body.push_str("- Roll containers back to the last stable image\n");
        }
        ActionType::CustomScript => {}
    }

    body.push_str(
        "\n### Review Checklist\n\n\
         - [ ] Verify the changes are appropriate\n\
         - [ ] Check resource limits and quotas\n\
         - [ ] Ensure no sensitive data is exposed\n\
         - [ ] Merge when ready\n",
    );

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{
        Action, AlertInfo, RemediationSpec, Strategy, StrategyMode, TargetResource,
    };
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::HashMap;

    fn remediation(action: ActionType, params: &[(&str, &str)]) -> Remediation {
        let mut rem = Remediation::new(
            "rem-kubepodoomkilled-20260301-101500",
            RemediationSpec {
                alert: AlertInfo {
                    name: "KubePodOOMKilled".to_string(),
                    alert_id: None,
                    fingerprint: "abc".to_string(),
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
                    action_type: action,
                    params: params
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                },
                strategy: Strategy {
                    mode: StrategyMode::GitOps,
                    require_approval: true,
                    environment: Some("prod".to_string()),
                    ttl: Some("24h".to_string()),
                },
                github: Some(github_spec(None)),
            },
        );
        rem.metadata.creation_timestamp =
            Some(Time(Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap()));
        rem
    }

    fn github_spec(title_template: Option<&str>) -> GitHubSpec {
        GitHubSpec {
            enabled: true,
            owner: "acme".to_string(),
            repo: "manifests".to_string(),
            base_branch: "main".to_string(),
            manifest_path: "manifests/{environment}/{namespace}/{name}.yaml".to_string(),
            pr_title_template: title_template.map(ToString::to_string),
            pr_labels: vec![],
            auto_merge: false,
        }
    }

    #[test]
    fn test_branch_name() {
        let rem = remediation(
            ActionType::IncreaseMemory,
            &[("memoryIncreasePercent", "25")],
        );
        assert_eq!(branch_name(&rem), "heal8s/increasememory/test-app-20260301-101500");
    }

    #[test]
    fn test_branch_name_is_deterministic() {
        let rem = remediation(ActionType::ScaleUp, &[]);
        assert_eq!(branch_name(&rem), branch_name(&rem));
    }

    #[test]
    fn test_pr_title_default_template() {
        let rem = remediation(ActionType::IncreaseMemory, &[]);
        let title = pr_title(&rem, &github_spec(None));
        assert_eq!(title, "[heal8s] IncreaseMemory: test-app in default");
    }

    #[test]
    fn test_pr_title_custom_template() {
        let rem = remediation(ActionType::ScaleUp, &[]);
        let title = pr_title(&rem, &github_spec(Some("fix {alert} on {target}")));
        assert_eq!(title, "fix KubePodOOMKilled on test-app");
    }

    #[test]
    fn test_pr_body_memory_action() {
        let rem = remediation(
            ActionType::IncreaseMemory,
            &[("memoryIncreasePercent", "25"), ("maxMemory", "2Gi")],
        );
        let body = pr_body(&rem);

        assert!(body.contains("**Alert**: KubePodOOMKilled"));
        assert!(body.contains("**Severity**: critical"));
        assert!(body.contains("**Target**: default/test-app (Deployment)"));
        assert!(body.contains("**Fingerprint**: abc"));
        assert!(body.contains("**Timestamp**: 2026-03-01T10:15:00+00:00"));
        assert!(body.contains("- Increase memory limits by 25%"));
        assert!(body.contains("- Maximum memory: 2Gi"));
        assert!(body.contains("### Review Checklist"));
        assert!(body.contains("- [ ] Merge when ready"));
    }

    #[test]
    fn test_pr_body_scale_action() {
        let rem = remediation(
            ActionType::ScaleUp,
            &[("scaleUpPercent", "50"), ("maxReplicas", "10")],
        );
        let body = pr_body(&rem);

        assert!(body.contains("- Scale up by 50%"));
        assert!(body.contains("- Maximum replicas: 10"));
    }
}
