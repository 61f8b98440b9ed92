use std::sync::{Arc, Weak};

use spindle_core::{CallbackGroup, EntityId, EntityKind, GuardCondition, Waitable};

/// One entity as seen by an executor, with a weak link to its group.
#[derive(Clone)]
pub struct CollectionEntry {
    pub id: EntityId,
    pub kind: EntityKind,
    pub entity: Weak<dyn Waitable>,
    pub group: Weak<CallbackGroup>,
}

impl CollectionEntry {
    /// Both the entity and its group, or `None` if either has been dropped.
    pub fn upgrade(&self) -> Option<(Arc<dyn Waitable>, Arc<CallbackGroup>)> {
        Some((self.entity.upgrade()?, self.group.upgrade()?))
    }
}

impl std::fmt::Debug for CollectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionEntry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Everything reachable from an executor's attached nodes and groups at
/// one point in time.
///
/// Entries are ordered by dispatch priority (timers, subscriptions,
/// services, clients, waitables), and by registration order within a kind.
#[derive(Debug, Default, Clone)]
pub struct EntitiesCollection {
    pub entries: Vec<CollectionEntry>,
    /// Node and group guard conditions that signal membership changes.
    pub notify_guards: Vec<Arc<GuardCondition>>,
}

impl EntitiesCollection {
    pub fn new(mut entries: Vec<CollectionEntry>, notify_guards: Vec<Arc<GuardCondition>>) -> Self {
        entries.sort_by_key(|e| e.kind);
        Self {
            entries,
            notify_guards,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn count_of(&self, kind: EntityKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn find(&self, id: EntityId) -> Option<&CollectionEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}
