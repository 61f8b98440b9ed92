use std::time::Instant;

use tracing::{trace, warn};

use crate::any_executable::AnyExecutable;

use super::ExecutorCore;

impl ExecutorCore {
    /// Run one selected executable and release its claims.
    ///
    /// A failing callback is logged and counted; it does not end the spin.
    pub fn execute_any_executable(&self, executable: AnyExecutable) {
        let AnyExecutable {
            id,
            kind,
            entity,
            callback_group,
            data,
        } = executable;

        let start = Instant::now();
        let result = entity.execute(data);
        let elapsed = start.elapsed();

        match &result {
            Ok(()) => trace!(executor = %self.id, entity = entity.name(), %kind, ?elapsed, "executed"),
            Err(e) => warn!(executor = %self.id, entity = entity.name(), %kind, error = %e, "execution failed"),
        }
        self.with_metrics(|m| m.record_execution(kind, elapsed, result.is_ok()));

        self.release_claim(id, &callback_group);
    }
}
