//! The patch engine and alert router.
//!
//! Everything in here is pure computation over in-memory workload objects:
//! callers (the lifecycle controller and the GitOps worker) decide how the
//! mutated object is persisted.

pub mod memory;
pub mod quantity;
pub mod rollback;
pub mod router;
pub mod scale;
pub mod workload;

pub use memory::{apply_increase_memory, MemoryChange};
pub use quantity::ByteQuantity;
pub use rollback::{apply_rollback_image, mark_image_stable, RollbackChange};
pub use router::{RouteError, RouteTable};
pub use scale::{apply_scale_up, ScaleChange};
pub use workload::{Workload, WorkloadKind};

use thiserror::Error;

use crate::crds::{Action, ActionType};

/// Dispatch an action onto an in-memory workload, returning a
/// human-readable change summary. Pure: persisting the mutation is the
/// caller's business.
pub fn apply_action(
    workload: &mut Workload,
    action: &Action,
    container: Option<&str>,
) -> Result<String, PatchError> {
    match action.action_type {
        ActionType::IncreaseMemory => {
            let container = container.unwrap_or_default();
            Ok(apply_increase_memory(workload, container, &action.params)?.to_string())
        }
        ActionType::ScaleUp => Ok(apply_scale_up(workload, &action.params)?.to_string()),
        ActionType::RollbackImage => Ok(apply_rollback_image(workload, &action.params)?.to_string()),
        ActionType::CustomScript => Err(PatchError::UnsupportedAction(
            ActionType::CustomScript.to_string(),
        )),
    }
}

/// Semantic patch-engine failures. These are terminal for the record that
/// triggered them: callers translate them into a Failed status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("container \"{0}\" not found")]
    ContainerNotFound(String),

    #[error("workload has no pod template")]
    MissingPodTemplate,

    #[error("scale not supported for {0}")]
    UnsupportedForScale(WorkloadKind),

    #[error("rollback not supported for {0}")]
    UnsupportedForRollback(WorkloadKind),

    #[error("unsupported target kind: {0}")]
    UnsupportedKind(String),

    #[error("unsupported action type: {0}")]
    UnsupportedAction(String),

    #[error("no previous stable image found (annotation {0} missing)")]
    NoStableImage(&'static str),

    #[error("invalid action params: {0}")]
    InvalidParams(String),
}
