use std::collections::VecDeque;

use spindle_core::{ExecutorError, WaitResult};
use tracing::debug;

use crate::any_executable::AnyExecutable;
use crate::collection::CollectionEntry;

use super::ExecutorCore;

impl ExecutorCore {
    /// Pop ready entries in priority order until one can be claimed and
    /// yields data.
    ///
    /// Entries whose entity or group has vanished, whose group is gated or
    /// busy, or that are already executing elsewhere are dropped from the
    /// queue; their readiness is level-triggered and resurfaces at the next
    /// wait once they become eligible. An error from `take_data` aborts the
    /// selection and is returned to the spinning caller.
    pub fn next_ready(
        &self,
        ready: &mut VecDeque<CollectionEntry>,
        result: &WaitResult,
    ) -> Result<Option<AnyExecutable>, ExecutorError> {
        while let Some(entry) = ready.pop_front() {
            let Some((entity, group)) = entry.upgrade() else {
                debug!(executor = %self.id, id = %entry.id, "ready entity expired");
                continue;
            };
            if !group.is_takeable() || self.is_executing(entry.id) {
                continue;
            }
            if !entity.is_ready(result) {
                continue;
            }
            if !self.try_claim(entry.id, &group) {
                continue;
            }

            match entity.take_data() {
                Ok(Some(data)) => {
                    return Ok(Some(AnyExecutable {
                        id: entry.id,
                        kind: entry.kind,
                        entity,
                        callback_group: group,
                        data,
                    }));
                }
                Ok(None) => {
                    self.release_claim(entry.id, &group);
                }
                Err(e) => {
                    self.release_claim(entry.id, &group);
                    return Err(e);
                }
            }
        }
        Ok(None)
    }
}
