//! RollbackImage: revert a Deployment's containers to the last image that
//! was marked stable.
//!
//! The stable image comes from the `heal8s.io/last-stable-image`
//! annotation, maintained by [`mark_image_stable`] after a healthy
//! rollout. Before overwriting, the images being rolled back from are
//! recorded in `heal8s.io/attempted-image` so a follow-up investigation
//! can see what was running.

use std::collections::HashMap;

use super::workload::{Workload, WorkloadKind};
use super::PatchError;

pub const LAST_STABLE_IMAGE_ANNOTATION: &str = "heal8s.io/last-stable-image";
pub const ATTEMPTED_IMAGE_ANNOTATION: &str = "heal8s.io/attempted-image";

/// What the patch did, for logs, events and PR bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackChange {
    pub stable_image: String,
    pub previous_images: Vec<String>,
}

impl std::fmt::Display for RollbackChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "image {} -> {}",
            self.previous_images.join(","),
            self.stable_image
        )
    }
}

/// Roll every container of a Deployment back to the stable image.
///
/// Only Deployments are supported; StatefulSets and DaemonSets have
/// rollout semantics this action does not model.
pub fn apply_rollback_image(
    workload: &mut Workload,
    _params: &HashMap<String, String>,
) -> Result<RollbackChange, PatchError> {
    if workload.kind() != WorkloadKind::Deployment {
        return Err(PatchError::UnsupportedForRollback(workload.kind()));
    }

    let stable_image = workload
        .annotation(LAST_STABLE_IMAGE_ANNOTATION)
        .map(ToString::to_string)
        .ok_or(PatchError::NoStableImage(LAST_STABLE_IMAGE_ANNOTATION))?;

    let mut previous_images = Vec::new();
    for container in workload.containers_mut()? {
        previous_images.push(container.image.clone().unwrap_or_default());
        container.image = Some(stable_image.clone());
    }

    workload
        .annotations_mut()
        .insert(ATTEMPTED_IMAGE_ANNOTATION.to_string(), previous_images.join(","));

    Ok(RollbackChange {
        stable_image,
        previous_images,
    })
}

/// Record the current first-container image as the stable rollback point.
/// Intended to be called after a rollout has been observed healthy.
pub fn mark_image_stable(workload: &mut Workload) {
    let image = workload
        .containers_mut()
        .ok()
        .and_then(|containers| containers.first().and_then(|c| c.image.clone()));

    if let Some(image) = image {
        workload
            .annotations_mut()
            .insert(LAST_STABLE_IMAGE_ANNOTATION.to_string(), image);
    }
}
