//! # Scaling Advisor
//!
//! Turns backlog and worker health into an advisory worker count. It never
//! resizes anything itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::ScalingConfig;
use crate::monitor::workers::WorkerHealthStatus;
use crate::monitor::{MonitorStatus, QueueMonitor, WorkerHealthMonitor};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingRecommendation {
    pub current_workers: usize,
    pub recommended_workers: usize,
    pub scale_up: bool,
    pub scale_down: bool,
    pub reason: String,
    /// Set when the inputs came from a degraded observation
    pub degraded: bool,
    pub computed_at: DateTime<Utc>,
}

/// `max(1, ceil((pending + queue_depth) / capacity))`, with scale-down held
/// back until pending drops under the low-water mark.
pub fn compute_recommendation(
    pending: u64,
    queue_depth: u64,
    current_workers: usize,
    config: &ScalingConfig,
) -> ScalingRecommendation {
    let capacity = u64::from(config.worker_capacity.max(1));
    let load = pending.saturating_add(queue_depth);
    let recommended_workers = load.div_ceil(capacity).max(1) as usize;

    let scale_up = recommended_workers > current_workers;
    let scale_down = recommended_workers < current_workers && pending < config.low_water_mark;

    let reason = if scale_up {
        format!(
            "{} queued jobs need {} workers at {} jobs per worker; {} running",
            load, recommended_workers, capacity, current_workers
        )
    } else if scale_down {
        format!(
            "{} queued jobs fit in {} workers and pending ({}) is under the low-water mark ({})",
            load, recommended_workers, pending, config.low_water_mark
        )
    } else if recommended_workers < current_workers {
        format!(
            "load fits in {} workers but pending ({}) is not under the low-water mark ({})",
            recommended_workers, pending, config.low_water_mark
        )
    } else {
        format!("{} workers match {} queued jobs", current_workers, load)
    };

    ScalingRecommendation {
        current_workers,
        recommended_workers,
        scale_up,
        scale_down,
        reason,
        degraded: false,
        computed_at: Utc::now(),
    }
}

#[derive(Clone)]
pub struct ScalingAdvisor {
    queues: QueueMonitor,
    workers: WorkerHealthMonitor,
    config: ScalingConfig,
}

impl ScalingAdvisor {
    pub fn new(queues: QueueMonitor, workers: WorkerHealthMonitor, config: ScalingConfig) -> Self {
        Self {
            queues,
            workers,
            config,
        }
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    /// Recommendation from a fresh backlog and worker health poll.
    pub async fn recommend(&self) -> ScalingRecommendation {
        let backlog = self.queues.backlog().await;
        let health = self.workers.health().await;

        let mut recommendation = compute_recommendation(
            backlog.total_pending,
            backlog.total_queue_depth(),
            health.total_workers,
            &self.config,
        );

        let degraded = backlog.status != MonitorStatus::Ok
            || matches!(
                health.status,
                WorkerHealthStatus::Degraded | WorkerHealthStatus::Unavailable
            );
        if degraded {
            recommendation.degraded = true;
            recommendation.reason = format!(
                "{} (inputs degraded: backlog {:?}, workers {:?})",
                recommendation.reason, backlog.status, health.status
            );
        }

        debug!(
            current = recommendation.current_workers,
            recommended = recommendation.recommended_workers,
            scale_up = recommendation.scale_up,
            scale_down = recommendation.scale_down,
            "scaling recommendation computed"
        );
        recommendation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScalingConfig {
        ScalingConfig {
            worker_capacity: 10,
            low_water_mark: 5,
        }
    }

    #[test]
    fn backlog_above_capacity_scales_up() {
        let recommendation = compute_recommendation(35, 5, 2, &config());
        assert_eq!(recommendation.recommended_workers, 4);
        assert!(recommendation.scale_up);
        assert!(!recommendation.scale_down);
    }

    #[test]
    fn empty_backlog_still_recommends_one_worker() {
        let recommendation = compute_recommendation(0, 0, 0, &config());
        assert_eq!(recommendation.recommended_workers, 1);
        assert!(recommendation.scale_up);
    }

    #[test]
    fn scale_down_waits_for_low_water_mark() {
        let held = compute_recommendation(8, 0, 4, &config());
        assert_eq!(held.recommended_workers, 1);
        assert!(!held.scale_down);

        let drained = compute_recommendation(2, 0, 4, &config());
        assert!(drained.scale_down);
        assert!(!drained.scale_up);
    }

    #[test]
    fn steady_state_neither_scales() {
        let recommendation = compute_recommendation(20, 0, 2, &config());
        assert_eq!(recommendation.recommended_workers, 2);
        assert!(!recommendation.scale_up && !recommendation.scale_down);
    }

    #[test]
    fn zero_capacity_is_treated_as_one() {
        let config = ScalingConfig {
            worker_capacity: 0,
            low_water_mark: 5,
        };
        assert_eq!(compute_recommendation(3, 0, 1, &config).recommended_workers, 3);
    }
}
