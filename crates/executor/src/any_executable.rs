use std::fmt;
use std::sync::Arc;

use spindle_core::{AnyData, CallbackGroup, EntityId, EntityKind, Waitable};

/// One selected unit of work: a ready entity, the data already taken from
/// it, and the group whose claim must be released after execution.
///
/// Built fresh per dispatch and consumed by exactly one execution.
pub struct AnyExecutable {
    pub id: EntityId,
    pub kind: EntityKind,
    pub entity: Arc<dyn Waitable>,
    pub callback_group: Arc<CallbackGroup>,
    pub data: AnyData,
}

impl fmt::Debug for AnyExecutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyExecutable")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("entity", &self.entity.name())
            .field("callback_group", &self.callback_group.id())
            .finish()
    }
}
