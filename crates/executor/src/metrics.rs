use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use spindle_core::EntityKind;

/// Executor operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorMetrics {
    /// Executions completed per entity kind.
    pub executions: HashMap<EntityKind, u64>,
    /// Executions whose callback returned an error.
    pub execution_failures: u64,
    /// Average execution duration per entity kind.
    pub avg_execution_duration: HashMap<EntityKind, Duration>,
    /// Wall-clock time of the last completed execution.
    pub last_execution: Option<DateTime<Utc>>,
    /// Blocking waits performed.
    pub waits: u64,
    /// Waits that returned without anything ready.
    pub wait_timeouts: u64,
    /// Times the entity collection was rebuilt.
    pub collection_rebuilds: u64,
}

impl ExecutorMetrics {
    pub fn record_execution(&mut self, kind: EntityKind, duration: Duration, succeeded: bool) {
        let count = self.executions.entry(kind).or_default();
        *count += 1;
        let count = *count;
        if !succeeded {
            self.execution_failures += 1;
        }
        self.last_execution = Some(Utc::now());

        let prev_avg = self
            .avg_execution_duration
            .get(&kind)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
        self.avg_execution_duration.insert(kind, new_avg);
    }

    pub fn record_wait(&mut self, timed_out: bool) {
        self.waits += 1;
        if timed_out {
            self.wait_timeouts += 1;
        }
    }

    pub fn record_rebuild(&mut self) {
        self.collection_rebuilds += 1;
    }

    pub fn total_executions(&self) -> u64 {
        self.executions.values().sum()
    }
}
