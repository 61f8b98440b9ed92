use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExecutorError;
use crate::guard_condition::GuardCondition;
use crate::waitable::{EntityId, EntityKind, Waitable};

/// Concurrency policy of a callback group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackGroupType {
    /// At most one member executes at any instant.
    MutuallyExclusive,
    /// Distinct members may execute concurrently.
    Reentrant,
}

/// The "can be taken from" switch of a callback group.
///
/// Application code may close the gate to suspend dispatch of the whole
/// group without removing anything. Closing never aborts an execution in
/// progress; reopening wakes any executor blocked on the group.
pub struct TakeGate {
    open: AtomicBool,
    notify: Arc<GuardCondition>,
}

impl TakeGate {
    fn new(notify: Arc<GuardCondition>) -> Self {
        Self {
            open: AtomicBool::new(true),
            notify,
        }
    }

    pub fn load(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn store(&self, open: bool) {
        self.exchange(open);
    }

    /// Set the gate and return the previous value.
    pub fn exchange(&self, open: bool) -> bool {
        let previous = self.open.swap(open, Ordering::SeqCst);
        if open && !previous {
            self.notify.trigger();
        }
        previous
    }
}

impl fmt::Debug for TakeGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TakeGate").field(&self.load()).finish()
    }
}

/// Weak handle to one member of a group, as handed to executors.
#[derive(Clone)]
pub struct EntityRef {
    pub id: EntityId,
    pub kind: EntityKind,
    pub entity: Weak<dyn Waitable>,
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("alive", &(self.entity.strong_count() > 0))
            .finish()
    }
}

fn address_of(entity: &Arc<dyn Waitable>) -> usize {
    Arc::as_ptr(entity) as *const () as usize
}

/// Process-wide owner of every registered entity, keyed by address.
///
/// Groups are not tied to a node or context, so membership across groups
/// can only be enforced here. The stored `Weak` keeps the allocation, and
/// with it the address, from being reused while the entry exists.
#[derive(Default)]
struct Memberships {
    owners: HashMap<usize, (Weak<dyn Waitable>, Uuid)>,
}

impl Memberships {
    fn global() -> &'static Mutex<Memberships> {
        static MEMBERSHIPS: OnceLock<Mutex<Memberships>> = OnceLock::new();
        MEMBERSHIPS.get_or_init(Default::default)
    }

    fn claim(&mut self, entity: &Arc<dyn Waitable>, group: Uuid) -> Result<(), ExecutorError> {
        self.owners.retain(|_, (weak, _)| weak.strong_count() > 0);
        let address = address_of(entity);
        if self.owners.contains_key(&address) {
            return Err(ExecutorError::AlreadyInGroup(entity.name().to_string()));
        }
        self.owners.insert(address, (Arc::downgrade(entity), group));
        Ok(())
    }

    fn release(&mut self, address: usize, group: Uuid) {
        if self.owners.get(&address).is_some_and(|(_, owner)| *owner == group) {
            self.owners.remove(&address);
        }
    }
}

/// Slot storage with stable iteration order and tombstoned removal.
///
/// Removed or expired entries leave a `None` slot behind; slots are
/// compacted once tombstones outnumber live entries.
#[derive(Default)]
struct EntityArena {
    slots: Vec<Option<EntityRef>>,
    by_address: HashMap<usize, usize>,
    tombstones: usize,
}

impl EntityArena {
    fn insert(&mut self, entity: &Arc<dyn Waitable>) -> Result<EntityId, ExecutorError> {
        let address = address_of(entity);
        if self.by_address.contains_key(&address) {
            return Err(ExecutorError::AlreadyInGroup(entity.name().to_string()));
        }
        let id = EntityId::next();
        self.by_address.insert(address, self.slots.len());
        self.slots.push(Some(EntityRef {
            id,
            kind: entity.kind(),
            entity: Arc::downgrade(entity),
        }));
        Ok(id)
    }

    fn remove(&mut self, entity: &Arc<dyn Waitable>) -> bool {
        let Some(slot) = self.by_address.remove(&address_of(entity)) else {
            return false;
        };
        self.slots[slot] = None;
        self.tombstones += 1;
        self.maybe_compact();
        true
    }

    fn contains(&self, entity: &Arc<dyn Waitable>) -> bool {
        self.by_address.contains_key(&address_of(entity))
    }

    fn prune_expired(&mut self) {
        let mut pruned = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|e| e.entity.strong_count() == 0) {
                *slot = None;
                pruned += 1;
            }
        }
        if pruned > 0 {
            self.tombstones += pruned;
            self.maybe_compact();
            self.reindex();
        }
    }

    fn maybe_compact(&mut self) {
        if self.tombstones * 2 <= self.slots.len() {
            return;
        }
        self.slots.retain(Option::is_some);
        self.tombstones = 0;
        self.reindex();
    }

    fn reindex(&mut self) {
        self.by_address.clear();
        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some(e) = entry.as_ref().filter(|e| e.entity.strong_count() > 0) {
                self.by_address.insert(e.entity.as_ptr() as *const () as usize, slot);
            }
        }
    }

    fn live(&self) -> impl Iterator<Item = &EntityRef> {
        self.slots.iter().flatten()
    }
}

/// A scheduling domain: a set of entities sharing one concurrency policy
/// and one take gate.
pub struct CallbackGroup {
    id: Uuid,
    kind: CallbackGroupType,
    automatically_add_to_executor_with_node: bool,
    gate: TakeGate,
    in_flight: AtomicBool,
    associated: AtomicBool,
    entities: Mutex<EntityArena>,
    notify_guard: Arc<GuardCondition>,
}

impl fmt::Debug for CallbackGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackGroup")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("gate", &self.gate)
            .field("size", &self.size())
            .finish()
    }
}

impl CallbackGroup {
    pub fn new(kind: CallbackGroupType, automatically_add_to_executor_with_node: bool) -> Arc<Self> {
        let notify_guard = GuardCondition::new();
        Arc::new(Self {
            id: Uuid::new_v4(),
            kind,
            automatically_add_to_executor_with_node,
            gate: TakeGate::new(Arc::clone(&notify_guard)),
            in_flight: AtomicBool::new(false),
            associated: AtomicBool::new(false),
            entities: Mutex::new(EntityArena::default()),
            notify_guard,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> CallbackGroupType {
        self.kind
    }

    pub fn automatically_add_to_executor_with_node(&self) -> bool {
        self.automatically_add_to_executor_with_node
    }

    pub fn can_be_taken_from(&self) -> &TakeGate {
        &self.gate
    }

    /// Triggered when membership changes or the gate reopens.
    pub fn notify_guard_condition(&self) -> &Arc<GuardCondition> {
        &self.notify_guard
    }

    /// Whether a scheduler may select a member right now.
    pub fn is_takeable(&self) -> bool {
        if !self.gate.load() {
            return false;
        }
        match self.kind {
            CallbackGroupType::MutuallyExclusive => !self.in_flight.load(Ordering::SeqCst),
            CallbackGroupType::Reentrant => true,
        }
    }

    /// Reserve the group for one execution. Always succeeds for reentrant groups.
    pub fn try_claim(&self) -> bool {
        match self.kind {
            CallbackGroupType::MutuallyExclusive => self
                .in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
            CallbackGroupType::Reentrant => true,
        }
    }

    pub fn release_claim(&self) {
        if self.kind == CallbackGroupType::MutuallyExclusive {
            self.in_flight.store(false, Ordering::SeqCst);
        }
    }

    /// Add `entity` to this group. An entity belongs to at most one group
    /// process-wide; joining a second one fails with `AlreadyInGroup`.
    pub fn add_entity(&self, entity: &Arc<dyn Waitable>) -> Result<EntityId, ExecutorError> {
        let id = {
            let mut arena = self.entities.lock().map_err(|_| ExecutorError::poisoned("callback group entities"))?;
            if arena.contains(entity) {
                return Err(ExecutorError::AlreadyInGroup(entity.name().to_string()));
            }
            Memberships::global()
                .lock()
                .map_err(|_| ExecutorError::poisoned("entity memberships"))?
                .claim(entity, self.id)?;
            arena.insert(entity)?
        };
        self.notify_guard.trigger();
        Ok(id)
    }

    pub fn remove_entity(&self, entity: &Arc<dyn Waitable>) -> bool {
        let removed = self
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity);
        if removed {
            Memberships::global()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .release(address_of(entity), self.id);
            self.notify_guard.trigger();
        }
        removed
    }

    pub fn contains(&self, entity: &Arc<dyn Waitable>) -> bool {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(entity)
    }

    /// Snapshot of the live members in stable registration order.
    pub fn collect_all_ptrs(&self) -> Vec<EntityRef> {
        let mut arena = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        arena.prune_expired();
        arena.live().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .live()
            .filter(|e| e.entity.strong_count() > 0)
            .count()
    }

    /// Mark the group as owned by an executor. Fails if already owned.
    pub fn claim_association(&self) -> bool {
        self.associated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn release_association(&self) {
        self.associated.store(false, Ordering::SeqCst);
    }

    pub fn is_associated_with_executor(&self) -> bool {
        self.associated.load(Ordering::SeqCst)
    }
}

impl Drop for CallbackGroup {
    fn drop(&mut self) {
        let arena = self.entities.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut memberships = Memberships::global()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for address in arena.by_address.keys() {
            memberships.release(*address, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorError;
    use crate::wait_set::{WaitResult, WaitSet};
    use crate::waitable::AnyData;

    struct Noop;

    impl Waitable for Noop {
        fn add_to_wait_set(&self, _wait_set: &mut WaitSet) {}
        fn is_ready(&self, _result: &WaitResult) -> bool {
            false
        }
        fn take_data(&self) -> Result<Option<AnyData>, ExecutorError> {
            Ok(None)
        }
        fn execute(&self, _data: AnyData) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    fn noop() -> Arc<dyn Waitable> {
        Arc::new(Noop)
    }

    #[test]
    fn entity_cannot_join_twice() {
        let group = CallbackGroup::new(CallbackGroupType::Reentrant, true);
        let entity = noop();
        group.add_entity(&entity).unwrap();
        assert!(matches!(
            group.add_entity(&entity),
            Err(ExecutorError::AlreadyInGroup(_))
        ));
        assert_eq!(group.size(), 1);
    }

    #[test]
    fn entity_cannot_join_a_second_group() {
        let first = CallbackGroup::new(CallbackGroupType::Reentrant, true);
        let second = CallbackGroup::new(CallbackGroupType::MutuallyExclusive, true);
        let entity = noop();
        first.add_entity(&entity).unwrap();
        assert!(matches!(
            second.add_entity(&entity),
            Err(ExecutorError::AlreadyInGroup(_))
        ));
        assert_eq!(second.size(), 0);

        assert!(first.remove_entity(&entity));
        second.add_entity(&entity).unwrap();
    }

    #[test]
    fn dropping_a_group_frees_its_members() {
        let entity = noop();
        {
            let doomed = CallbackGroup::new(CallbackGroupType::Reentrant, true);
            doomed.add_entity(&entity).unwrap();
        }
        let survivor = CallbackGroup::new(CallbackGroupType::Reentrant, true);
        survivor.add_entity(&entity).unwrap();
        assert!(survivor.contains(&entity));
    }

    #[test]
    fn removal_keeps_order_of_survivors() {
        let group = CallbackGroup::new(CallbackGroupType::MutuallyExclusive, true);
        let entities: Vec<_> = (0..6).map(|_| noop()).collect();
        let ids: Vec<_> = entities
            .iter()
            .map(|e| group.add_entity(e).unwrap())
            .collect();

        for e in entities.iter().step_by(2) {
            assert!(group.remove_entity(e));
        }
        assert!(!group.remove_entity(&entities[0]));

        let remaining: Vec<_> = group.collect_all_ptrs().iter().map(|e| e.id).collect();
        assert_eq!(remaining, vec![ids[1], ids[3], ids[5]]);
        assert!(group.contains(&entities[5]));
        assert!(!group.contains(&entities[4]));
    }

    #[test]
    fn expired_entities_are_pruned() {
        let group = CallbackGroup::new(CallbackGroupType::Reentrant, true);
        let kept = noop();
        group.add_entity(&kept).unwrap();
        {
            let dropped = noop();
            group.add_entity(&dropped).unwrap();
        }
        assert_eq!(group.collect_all_ptrs().len(), 1);
        assert!(group.contains(&kept));
    }

    #[test]
    fn mutually_exclusive_claim_is_single() {
        let group = CallbackGroup::new(CallbackGroupType::MutuallyExclusive, true);
        assert!(group.try_claim());
        assert!(!group.is_takeable());
        assert!(!group.try_claim());
        group.release_claim();
        assert!(group.is_takeable());

        let reentrant = CallbackGroup::new(CallbackGroupType::Reentrant, true);
        assert!(reentrant.try_claim());
        assert!(reentrant.try_claim());
        assert!(reentrant.is_takeable());
    }

    #[test]
    fn reopening_gate_triggers_notify() {
        let group = CallbackGroup::new(CallbackGroupType::MutuallyExclusive, true);
        let gate = group.can_be_taken_from();
        group.notify_guard_condition().clear();

        assert!(gate.exchange(false));
        assert!(!group.is_takeable());
        assert!(!group.notify_guard_condition().is_triggered());

        gate.store(true);
        assert!(group.is_takeable());
        assert!(group.notify_guard_condition().is_triggered());
    }

    #[test]
    fn association_is_exclusive() {
        let group = CallbackGroup::new(CallbackGroupType::Reentrant, false);
        assert!(group.claim_association());
        assert!(!group.claim_association());
        group.release_association();
        assert!(!group.is_associated_with_executor());
    }
}
