//! End-to-end pipeline tests that need no cluster: an Alertmanager
//! payload is routed into a remediation spec, the target manifest is
//! decoded, patched and re-encoded the way the GitOps worker would do it.

use std::collections::HashMap;

use heal8s::crds::{ActionType, GitHubSpec, Remediation, StrategyMode};
use heal8s::gitops::processor::{branch_name, pr_body, pr_title};
use heal8s::remediate::{apply_action, RouteTable};
use heal8s::webhook::payload::AlertmanagerPayload;
use heal8s::webhook::remediation_name;

use chrono::{TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

const OOM_PAYLOAD: &str = r#"{
    "version": "4",
    "receiver": "heal8s",
    "status": "firing",
    "groupKey": "{}:{alertname=\"KubePodOOMKilled\"}",
    "groupLabels": {"alertname": "KubePodOOMKilled"},
    "commonLabels": {},
    "commonAnnotations": {},
    "externalURL": "http://alertmanager:9093",
    "alerts": [{
        "status": "firing",
        "labels": {
            "alertname": "KubePodOOMKilled",
            "namespace": "default",
            "deployment": "test-app",
            "container": "app",
            "severity": "critical",
            "environment": "prod"
        },
        "annotations": {"summary": "Pod OOMKilled"},
        "startsAt": "2026-03-01T10:15:00Z",
        "generatorURL": "http://prometheus/graph",
        "fingerprint": "abc"
    }]
}"#;

const TEST_APP_MANIFEST: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: test-app
  namespace: default
spec:
  replicas: 3
  selector:
    matchLabels:
      app: test-app
  template:
    metadata:
      labels:
        app: test-app
    spec:
      containers:
        - name: app
          image: nginx:latest
          resources:
            limits:
              memory: 256Mi
            requests:
              memory: 128Mi
"#;

fn github_spec() -> GitHubSpec {
    GitHubSpec {
        enabled: true,
        owner: "acme".to_string(),
        repo: "manifests".to_string(),
        base_branch: "main".to_string(),
        manifest_path: "manifests/{environment}/{namespace}/{name}.yaml".to_string(),
        pr_title_template: None,
        pr_labels: vec!["heal8s".to_string()],
        auto_merge: false,
    }
}

#[test]
fn oom_alert_becomes_a_pull_request_worth_of_changes() {
    // Intake: parse and route the webhook payload.
    let payload: AlertmanagerPayload = serde_json::from_str(OOM_PAYLOAD).unwrap();
    let alert = &payload.alerts[0];
    assert!(alert.is_firing());

    let spec = RouteTable::default().route(alert).unwrap();
    assert_eq!(spec.action.action_type, ActionType::IncreaseMemory);
    assert_eq!(spec.strategy.mode, StrategyMode::GitOps);
    assert_eq!(spec.target.name, "test-app");

    // The record name is the idempotency key.
    let name = remediation_name(alert.name(), alert.starts_at);
    assert_eq!(name, "rem-kubepodoomkilled-20260301-101500");

    // GitOps pipeline: interpolate, decode, patch, encode.
    let mut remediation = Remediation::new(&name, spec);
    remediation.spec.github = Some(github_spec());
    remediation.metadata.creation_timestamp =
        Some(Time(Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 30).unwrap()));

    let path = heal8s::gitops::manifest::interpolate_path(
        &remediation.spec.github.as_ref().unwrap().manifest_path,
        &remediation,
    );
    assert_eq!(path, "manifests/prod/default/test-app.yaml");

    let mut workload = heal8s::gitops::manifest::decode_workload(TEST_APP_MANIFEST).unwrap();
    let change = apply_action(
        &mut workload,
        &remediation.spec.action,
        remediation.spec.target.container.as_deref(),
    )
    .unwrap();
    assert!(change.contains("256Mi"));
    assert!(change.contains("320Mi"));

    let patched = heal8s::gitops::manifest::encode_workload(&workload).unwrap();
    assert!(patched.contains("320Mi"));

    // Branch, title and body the PR would carry.
    assert_eq!(
        branch_name(&remediation),
        "heal8s/increasememory/test-app-20260301-101530"
    );
    let gh = remediation.spec.github.clone().unwrap();
    assert_eq!(
        pr_title(&remediation, &gh),
        "[heal8s] IncreaseMemory: test-app in default"
    );
    let body = pr_body(&remediation);
    assert!(body.contains("**Alert**: KubePodOOMKilled"));
    assert!(body.contains("- Increase memory limits by 25%"));
}

#[test]
fn scale_up_pipeline_grows_replicas() {
    let payload: AlertmanagerPayload = serde_json::from_str(
        &OOM_PAYLOAD.replace("KubePodOOMKilled", "KubeHpaMaxedOut"),
    )
    .unwrap();
    let spec = RouteTable::default().route(&payload.alerts[0]).unwrap();
    assert_eq!(spec.action.action_type, ActionType::ScaleUp);

    let mut workload = heal8s::gitops::manifest::decode_workload(TEST_APP_MANIFEST).unwrap();
    let change = apply_action(&mut workload, &spec.action, None).unwrap();

    // 3 replicas at 50% -> 5
    assert_eq!(change, "replicas 3 -> 5");
    let patched = heal8s::gitops::manifest::encode_workload(&workload).unwrap();
    assert!(patched.contains("replicas: 5"));
}

#[test]
fn routing_the_same_payload_twice_yields_the_same_record_name() {
    let payload: AlertmanagerPayload = serde_json::from_str(OOM_PAYLOAD).unwrap();
    let alert = &payload.alerts[0];

    let first = remediation_name(alert.name(), alert.starts_at);
    let second = remediation_name(alert.name(), alert.starts_at);
    assert_eq!(first, second);
}

#[test]
fn unknown_alert_is_a_routing_error_not_a_panic() {
    let payload: AlertmanagerPayload = serde_json::from_str(
        &OOM_PAYLOAD.replace("KubePodOOMKilled", "NotConfigured"),
    )
    .unwrap();

    let err = RouteTable::default().route(&payload.alerts[0]).unwrap_err();
    assert_eq!(err.to_string(), "no route configured for alert: NotConfigured");
}

#[test]
fn determinism_of_the_full_patch_pipeline() {
    let spec_params: HashMap<String, String> = HashMap::from([
        ("memoryIncreasePercent".to_string(), "25".to_string()),
        ("maxMemory".to_string(), "2Gi".to_string()),
    ]);
    let action = heal8s::crds::Action {
        action_type: ActionType::IncreaseMemory,
        params: spec_params,
    };

    let run = || {
        let mut workload = heal8s::gitops::manifest::decode_workload(TEST_APP_MANIFEST).unwrap();
        apply_action(&mut workload, &action, Some("app")).unwrap();
        heal8s::gitops::manifest::encode_workload(&workload).unwrap()
    };

    assert_eq!(run(), run());
}
