//! IncreaseMemory: raise a container's memory limit (and request) by a
//! percentage, aligned up to 64Mi, capped at a configurable maximum.

use k8s_openapi::api::core::v1::{Container, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::{BTreeMap, HashMap};

use super::quantity::ByteQuantity;
use super::workload::Workload;
use super::PatchError;

const DEFAULT_INCREASE_PERCENT: u64 = 25;
const DEFAULT_MAX_MEMORY: &str = "2Gi";
/// Starting point when the container has no memory limit at all.
const DEFAULT_BASELINE_MEMORY: &str = "256Mi";

/// What the patch did, for logs, events and PR bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChange {
    pub container: String,
    pub old: ByteQuantity,
    pub new: ByteQuantity,
}

impl std::fmt::Display for MemoryChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "memory {} -> {} ({})", self.old, self.new, self.container)
    }
}

/// Increase the memory limit of the targeted container.
///
/// Params: `memoryIncreasePercent` (default 25) and `maxMemory` (default
/// 2Gi). With an empty `container_name` and exactly one container, that
/// container is selected; otherwise the container is matched by name.
/// The request is set equal to the limit for predictable scheduling.
pub fn apply_increase_memory(
    workload: &mut Workload,
    container_name: &str,
    params: &HashMap<String, String>,
) -> Result<MemoryChange, PatchError> {
    let percent = parse_numeric_param(params, "memoryIncreasePercent", DEFAULT_INCREASE_PERCENT)?;
    let max_memory = parse_quantity(params, "maxMemory", DEFAULT_MAX_MEMORY)?;

    let containers = workload.containers_mut()?;
    let container = select_container(containers, container_name)?;

    let current = current_memory_limit(container);
    let new = current.increased_by_percent(percent).capped_at(max_memory);

    let resources = container.resources.get_or_insert_with(ResourceRequirements::default);
    let quantity = Quantity(new.to_string());
    resources
        .limits
        .get_or_insert_with(BTreeMap::new)
        .insert("memory".to_string(), quantity.clone());
    resources
        .requests
        .get_or_insert_with(BTreeMap::new)
        .insert("memory".to_string(), quantity);

    Ok(MemoryChange {
        container: container.name.clone(),
        old: current,
        new,
    })
}

fn select_container<'a>(
    containers: &'a mut [Container],
    name: &str,
) -> Result<&'a mut Container, PatchError> {
    if name.is_empty() && containers.len() == 1 {
        return Ok(&mut containers[0]);
    }
    containers
        .iter_mut()
        .find(|c| c.name == name)
        .ok_or_else(|| PatchError::ContainerNotFound(name.to_string()))
}

fn current_memory_limit(container: &Container) -> ByteQuantity {
    container
        .resources
        .as_ref()
        .and_then(|r| r.limits.as_ref())
        .and_then(|l| l.get("memory"))
        .and_then(|q| q.0.parse().ok())
        .unwrap_or_else(|| {
            DEFAULT_BASELINE_MEMORY
                .parse()
                .expect("default baseline memory is a valid quantity")
        })
}

pub(super) fn parse_numeric_param(
    params: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, PatchError> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| PatchError::InvalidParams(format!("{key}={raw}"))),
    }
}

fn parse_quantity(
    params: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<ByteQuantity, PatchError> {
    match params.get(key) {
        None => Ok(default.parse().expect("default quantity is valid")),
        Some(raw) => raw
            .parse()
            .map_err(|_| PatchError::InvalidParams(format!("{key}={raw}"))),
    }
}
