//! ScaleUp: raise the replica count by a percentage, capped at a maximum.

use std::collections::HashMap;

use super::memory::parse_numeric_param;
use super::workload::Workload;
use super::PatchError;

const DEFAULT_SCALE_PERCENT: u64 = 50;
const DEFAULT_MAX_REPLICAS: u64 = 10;

/// What the patch did, for logs, events and PR bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleChange {
    pub old: i32,
    pub new: i32,
}

impl std::fmt::Display for ScaleChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "replicas {} -> {}", self.old, self.new)
    }
}

/// Scale up a Deployment or StatefulSet.
///
/// Params: `scaleUpPercent` (default 50) and `maxReplicas` (default 10).
/// The increase is `ceil(current * percent / 100)`, floored at 1 so a
/// small workload still grows; under-scaling would just re-fire the alert.
/// Unset replicas count as 1. DaemonSets cannot be scaled.
pub fn apply_scale_up(
    workload: &mut Workload,
    params: &HashMap<String, String>,
) -> Result<ScaleChange, PatchError> {
    let percent = parse_numeric_param(params, "scaleUpPercent", DEFAULT_SCALE_PERCENT)?;
    let max_replicas = parse_numeric_param(params, "maxReplicas", DEFAULT_MAX_REPLICAS)?;

    let current = workload.replicas()?;
    let new = scaled_replicas(current, percent, max_replicas);
    workload.set_replicas(new)?;

    Ok(ScaleChange { old: current, new })
}

fn scaled_replicas(current: i32, percent: u64, max_replicas: u64) -> i32 {
    let current = i64::from(current.max(0));
    let percent = i64::try_from(percent).unwrap_or(i64::MAX);
    let increase = ((current * percent) + 99) / 100;
    let increase = increase.max(1);

    let max = i64::try_from(max_replicas).unwrap_or(i64::MAX);
    let new = (current + increase).min(max);
    i32::try_from(new).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::super::workload::testutil::{container, daemon_set, deployment, stateful_set};
    use super::super::WorkloadKind;
    use super::*;

    fn params(percent: &str, max: &str) -> HashMap<String, String> {
        HashMap::from([
            ("scaleUpPercent".to_string(), percent.to_string()),
            ("maxReplicas".to_string(), max.to_string()),
        ])
    }

    #[test]
    fn test_three_replicas_at_fifty_percent() {
        let mut workload = deployment("web-app", Some(3), vec![container("web", "nginx", None)]);

        let change = apply_scale_up(&mut workload, &params("50", "10")).unwrap();

        // ceil(1.5) = 2 extra replicas
        assert_eq!(change, ScaleChange { old: 3, new: 5 });
        assert_eq!(workload.replicas().unwrap(), 5);
    }

    #[test]
    fn test_cap_at_max_replicas() {
        let mut workload = deployment("web-app", Some(8), vec![container("web", "nginx", None)]);

        let change = apply_scale_up(&mut workload, &params("50", "10")).unwrap();

        assert_eq!(change.new, 10);
    }

    #[test]
    fn test_unset_replicas_counts_as_one() {
        let mut workload = deployment("web-app", None, vec![container("web", "nginx", None)]);

        let change = apply_scale_up(&mut workload, &params("50", "10")).unwrap();

        assert_eq!(change, ScaleChange { old: 1, new: 2 });
    }

    #[test]
    fn test_increase_is_at_least_one() {
        let mut workload = deployment("web-app", Some(1), vec![container("web", "nginx", None)]);

        let change = apply_scale_up(&mut workload, &params("10", "10")).unwrap();

        assert_eq!(change.new, 2);
    }

    #[test]
    fn test_stateful_set_scales() {
        let mut workload = stateful_set("db", Some(2), vec![container("db", "postgres", None)]);

        let change = apply_scale_up(&mut workload, &params("50", "10")).unwrap();

        assert_eq!(change.new, 3);
    }

    #[test]
    fn test_daemon_set_rejected() {
        let mut workload = daemon_set("agent", vec![container("agent", "agent:v1", None)]);

        let err = apply_scale_up(&mut workload, &params("50", "10")).unwrap_err();

        assert_eq!(err, PatchError::UnsupportedForScale(WorkloadKind::DaemonSet));
    }

    #[test]
    fn test_defaults_when_params_absent() {
        let mut workload = deployment("web-app", Some(4), vec![container("web", "nginx", None)]);

        let change = apply_scale_up(&mut workload, &HashMap::new()).unwrap();

        assert_eq!(change.new, 6);
    }
}
