//! Capability view over the workload kinds the patch engine can mutate.
//!
//! The patch algorithms operate on `Workload` rather than the concrete
//! apps/v1 types: pod-template containers, replicas and annotations are
//! exposed as accessors, and each variant answers for the capabilities it
//! actually has (a DaemonSet has no replica count).

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use kube::api::PostParams;
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::PatchError;

/// Supported workload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkloadKind {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deployment" => Ok(Self::Deployment),
            "StatefulSet" => Ok(Self::StatefulSet),
            "DaemonSet" => Ok(Self::DaemonSet),
            other => Err(PatchError::UnsupportedKind(other.to_string())),
        }
    }
}

/// An in-memory workload object. Mutations never persist by themselves;
/// callers push the object back through [`Workload::update`] or encode it
/// to YAML for the GitOps path.
#[derive(Debug, Clone)]
pub enum Workload {
    Deployment(Box<Deployment>),
    StatefulSet(Box<StatefulSet>),
    DaemonSet(Box<DaemonSet>),
}

impl Workload {
    #[must_use]
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::Deployment(_) => WorkloadKind::Deployment,
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
            Self::DaemonSet(_) => WorkloadKind::DaemonSet,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        let name = match self {
            Self::Deployment(d) => d.metadata.name.as_deref(),
            Self::StatefulSet(s) => s.metadata.name.as_deref(),
            Self::DaemonSet(d) => d.metadata.name.as_deref(),
        };
        name.unwrap_or_default()
    }

    /// Mutable pod spec of the workload's pod template.
    pub fn pod_spec_mut(&mut self) -> Result<&mut PodSpec, PatchError> {
        let template_spec = match self {
            Self::Deployment(d) => d.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
            Self::StatefulSet(s) => s.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
            Self::DaemonSet(d) => d.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
        };
        template_spec.ok_or(PatchError::MissingPodTemplate)
    }

    /// Mutable pod-template containers.
    pub fn containers_mut(&mut self) -> Result<&mut Vec<Container>, PatchError> {
        Ok(&mut self.pod_spec_mut()?.containers)
    }

    /// Current replica count; unset replicas default to 1 the way the API
    /// server would schedule them. DaemonSets have no replica count.
    pub fn replicas(&self) -> Result<i32, PatchError> {
        match self {
            Self::Deployment(d) => Ok(d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)),
            Self::StatefulSet(s) => Ok(s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)),
            Self::DaemonSet(_) => Err(PatchError::UnsupportedForScale(WorkloadKind::DaemonSet)),
        }
    }

    pub fn set_replicas(&mut self, replicas: i32) -> Result<(), PatchError> {
        match self {
            Self::Deployment(d) => {
                if let Some(spec) = d.spec.as_mut() {
                    spec.replicas = Some(replicas);
                }
                Ok(())
            }
            Self::StatefulSet(s) => {
                if let Some(spec) = s.spec.as_mut() {
                    spec.replicas = Some(replicas);
                }
                Ok(())
            }
            Self::DaemonSet(_) => Err(PatchError::UnsupportedForScale(WorkloadKind::DaemonSet)),
        }
    }

    /// Object-level annotations, created on first use.
    pub fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        let metadata = match self {
            Self::Deployment(d) => &mut d.metadata,
            Self::StatefulSet(s) => &mut s.metadata,
            Self::DaemonSet(d) => &mut d.metadata,
        };
        metadata.annotations.get_or_insert_with(BTreeMap::new)
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        let annotations = match self {
            Self::Deployment(d) => d.metadata.annotations.as_ref(),
            Self::StatefulSet(s) => s.metadata.annotations.as_ref(),
            Self::DaemonSet(d) => d.metadata.annotations.as_ref(),
        };
        annotations.and_then(|a| a.get(key)).map(String::as_str)
    }

    /// Fetch the workload from the cluster.
    pub async fn get(
        client: Client,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Self, kube::Error> {
        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(client, namespace);
                Ok(Self::Deployment(Box::new(api.get(name).await?)))
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(client, namespace);
                Ok(Self::StatefulSet(Box::new(api.get(name).await?)))
            }
            WorkloadKind::DaemonSet => {
                let api: Api<DaemonSet> = Api::namespaced(client, namespace);
                Ok(Self::DaemonSet(Box::new(api.get(name).await?)))
            }
        }
    }

    /// Persist the (mutated) workload back to the cluster. The object's
    /// resourceVersion from the earlier get makes this an optimistic
    /// write.
    pub async fn update(&self, client: Client, namespace: &str) -> Result<(), kube::Error> {
        let pp = PostParams::default();
        match self {
            Self::Deployment(d) => {
                let api: Api<Deployment> = Api::namespaced(client, namespace);
                api.replace(self.name(), &pp, d).await?;
            }
            Self::StatefulSet(s) => {
                let api: Api<StatefulSet> = Api::namespaced(client, namespace);
                api.replace(self.name(), &pp, s).await?;
            }
            Self::DaemonSet(d) => {
                let api: Api<DaemonSet> = Api::namespaced(client, namespace);
                api.replace(self.name(), &pp, d).await?;
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::{container, daemon_set, deployment};
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "Deployment".parse::<WorkloadKind>().unwrap(),
            WorkloadKind::Deployment
        );
        assert_eq!(
            "StatefulSet".parse::<WorkloadKind>().unwrap(),
            WorkloadKind::StatefulSet
        );
        assert!(matches!(
            "CronJob".parse::<WorkloadKind>(),
            Err(PatchError::UnsupportedKind(k)) if k == "CronJob"
        ));
    }

    #[test]
    fn test_replicas_default_to_one() {
        let workload = deployment("web", None, vec![container("web", "nginx", None)]);
        assert_eq!(workload.replicas().unwrap(), 1);
    }

    #[test]
    fn test_daemon_set_has_no_replicas() {
        let mut workload = daemon_set("agent", vec![container("agent", "agent:v1", None)]);
        assert!(matches!(
            workload.replicas(),
            Err(PatchError::UnsupportedForScale(WorkloadKind::DaemonSet))
        ));
        assert!(workload.set_replicas(3).is_err());
    }

    #[test]
    fn test_annotations_created_on_first_use() {
        let mut workload = deployment("web", Some(1), vec![container("web", "nginx", None)]);
        assert!(workload.annotation("heal8s.io/last-stable-image").is_none());
        workload
            .annotations_mut()
            .insert("heal8s.io/last-stable-image".to_string(), "nginx:1.0".to_string());
        assert_eq!(
            workload.annotation("heal8s.io/last-stable-image"),
            Some("nginx:1.0")
        );
    }
}
