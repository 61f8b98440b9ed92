use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use spindle_core::{CallbackGroup, Context, EntityId, ExecutorError, GuardCondition, Node};
use tracing::{debug, info};
use uuid::Uuid;

use crate::collection::{CollectionEntry, EntitiesCollection};
use crate::config::ExecutorConfig;
use crate::metrics::ExecutorMetrics;

/// A callback group owned by this executor.
struct AttachedGroup {
    group: Weak<CallbackGroup>,
    /// The node it came with, or `None` when added directly.
    via_node: Option<Weak<Node>>,
}

#[derive(Default)]
struct Attachments {
    nodes: Vec<Weak<Node>>,
    groups: Vec<AttachedGroup>,
}

/// State shared by every executor strategy: attached nodes and groups, the
/// spinning flag, the interrupt guard condition, and execution bookkeeping.
pub struct ExecutorCore {
    pub(super) id: Uuid,
    pub(super) context: Arc<Context>,
    pub(super) config: ExecutorConfig,
    pub(super) spinning: AtomicBool,
    /// Held by the running `spin*` call from entry until it returns. Unlike
    /// `spinning`, `cancel()` does not clear it.
    loop_active: AtomicBool,
    /// Triggered by `cancel()` and by attachment changes; part of every wait.
    pub(super) interrupt_guard: Arc<GuardCondition>,
    attachments: Mutex<Attachments>,
    /// Entities currently executing on some thread.
    pub(super) executing: Mutex<HashSet<EntityId>>,
    pub(super) metrics: Arc<RwLock<ExecutorMetrics>>,
    /// Wake the waiting thread whenever an execution finishes.
    pub(super) wake_on_release: bool,
}

/// Resets the spinning state when a `spin*` call returns.
#[must_use]
pub struct SpinGuard<'a> {
    spinning: &'a AtomicBool,
    loop_active: &'a AtomicBool,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.spinning.store(false, Ordering::SeqCst);
        self.loop_active.store(false, Ordering::SeqCst);
    }
}

impl ExecutorCore {
    pub fn new(context: Arc<Context>, config: ExecutorConfig, wake_on_release: bool) -> Self {
        let id = Uuid::new_v4();
        info!(executor = %id, kind = %config.kind, "executor created");
        Self {
            id,
            context,
            config,
            spinning: AtomicBool::new(false),
            loop_active: AtomicBool::new(false),
            interrupt_guard: GuardCondition::new(),
            attachments: Mutex::new(Attachments::default()),
            executing: Mutex::new(HashSet::new()),
            metrics: Arc::new(RwLock::new(ExecutorMetrics::default())),
            wake_on_release,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn interrupt_guard_condition(&self) -> &Arc<GuardCondition> {
        &self.interrupt_guard
    }

    // ── Spin state ──────────────────────────────────────────────────

    /// Enter the spinning state, failing if another `spin*` call is active.
    ///
    /// A canceled call that has not returned yet still counts as active.
    pub fn begin_spin(&self, op: &'static str) -> Result<SpinGuard<'_>, ExecutorError> {
        if self.loop_active.swap(true, Ordering::SeqCst) {
            return Err(ExecutorError::ConcurrentSpin(op));
        }
        self.spinning.store(true, Ordering::SeqCst);
        debug!(executor = %self.id, op, "spin started");
        Ok(SpinGuard {
            spinning: &self.spinning,
            loop_active: &self.loop_active,
        })
    }

    pub fn is_spinning(&self) -> bool {
        self.spinning.load(Ordering::SeqCst)
    }

    /// Spinning and the context still valid.
    pub fn should_continue(&self) -> bool {
        self.is_spinning() && self.context.is_valid()
    }

    /// Ask the active spin to stop. `is_spinning()` turns false at once; the
    /// spinning thread leaves its loop after the current wait or execution,
    /// and a new `spin*` call is rejected until then.
    pub fn cancel(&self) {
        if self.spinning.swap(false, Ordering::SeqCst) {
            info!(executor = %self.id, "spin canceled");
            self.interrupt_guard.trigger();
        }
    }

    pub fn metrics(&self) -> ExecutorMetrics {
        self.metrics
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub(super) fn with_metrics(&self, f: impl FnOnce(&mut ExecutorMetrics)) {
        if let Ok(mut m) = self.metrics.write() {
            f(&mut m);
        }
    }

    // ── Attachments ─────────────────────────────────────────────────

    fn lock_attachments(&self) -> Result<std::sync::MutexGuard<'_, Attachments>, ExecutorError> {
        self.attachments
            .lock()
            .map_err(|_| ExecutorError::poisoned("executor attachments"))
    }

    /// Attach a node and every automatically-added group it owns.
    pub fn add_node(&self, node: &Arc<Node>, notify: bool) -> Result<(), ExecutorError> {
        if !node.claim_association() {
            return Err(ExecutorError::AlreadyAttached {
                kind: "node",
                name: node.fully_qualified_name(),
            });
        }
        {
            let mut attachments = self.lock_attachments().inspect_err(|_| node.release_association())?;
            attachments.nodes.push(Arc::downgrade(node));
            Self::attach_node_groups(&mut attachments, node);
        }
        info!(executor = %self.id, node = %node.fully_qualified_name(), "node attached");
        if notify {
            self.interrupt_guard.trigger();
        }
        Ok(())
    }

    /// Claim the node's automatic groups not yet owned by any executor.
    fn attach_node_groups(attachments: &mut Attachments, node: &Arc<Node>) {
        for group in node.callback_groups() {
            if !group.automatically_add_to_executor_with_node() {
                continue;
            }
            let known = attachments
                .groups
                .iter()
                .any(|g| g.group.as_ptr() == Arc::as_ptr(&group));
            if !known && group.claim_association() {
                attachments.groups.push(AttachedGroup {
                    group: Arc::downgrade(&group),
                    via_node: Some(Arc::downgrade(node)),
                });
            }
        }
    }

    pub fn remove_node(&self, node: &Arc<Node>, notify: bool) -> Result<(), ExecutorError> {
        {
            let mut attachments = self.lock_attachments()?;
            let before = attachments.nodes.len();
            attachments
                .nodes
                .retain(|n| n.strong_count() > 0 && n.as_ptr() != Arc::as_ptr(node));
            if attachments.nodes.len() == before {
                return Err(ExecutorError::NotAttached {
                    kind: "node",
                    name: node.fully_qualified_name(),
                });
            }
            attachments.groups.retain(|g| {
                let from_node = g
                    .via_node
                    .as_ref()
                    .is_some_and(|n| n.as_ptr() == Arc::as_ptr(node));
                if from_node {
                    if let Some(group) = g.group.upgrade() {
                        group.release_association();
                    }
                }
                !from_node
            });
        }
        node.release_association();
        info!(executor = %self.id, node = %node.fully_qualified_name(), "node detached");
        if notify {
            self.interrupt_guard.trigger();
        }
        Ok(())
    }

    pub fn add_callback_group(&self, group: &Arc<CallbackGroup>, notify: bool) -> Result<(), ExecutorError> {
        if !group.claim_association() {
            return Err(ExecutorError::AlreadyAttached {
                kind: "callback group",
                name: group.id().to_string(),
            });
        }
        self.lock_attachments()
            .inspect_err(|_| group.release_association())?
            .groups
            .push(AttachedGroup {
                group: Arc::downgrade(group),
                via_node: None,
            });
        debug!(executor = %self.id, group = %group.id(), kind = ?group.kind(), "callback group attached");
        if notify {
            self.interrupt_guard.trigger();
        }
        Ok(())
    }

    pub fn remove_callback_group(&self, group: &Arc<CallbackGroup>, notify: bool) -> Result<(), ExecutorError> {
        {
            let mut attachments = self.lock_attachments()?;
            let before = attachments.groups.len();
            attachments
                .groups
                .retain(|g| g.group.as_ptr() != Arc::as_ptr(group));
            if attachments.groups.len() == before {
                return Err(ExecutorError::NotAttached {
                    kind: "callback group",
                    name: group.id().to_string(),
                });
            }
        }
        group.release_association();
        debug!(executor = %self.id, group = %group.id(), "callback group detached");
        if notify {
            self.interrupt_guard.trigger();
        }
        Ok(())
    }

    pub fn get_all_callback_groups(&self) -> Vec<Arc<CallbackGroup>> {
        self.groups_matching(|_| true)
    }

    pub fn get_manually_added_callback_groups(&self) -> Vec<Arc<CallbackGroup>> {
        self.groups_matching(|g| g.via_node.is_none())
    }

    pub fn get_automatically_added_callback_groups_from_nodes(&self) -> Vec<Arc<CallbackGroup>> {
        self.groups_matching(|g| g.via_node.is_some())
    }

    fn groups_matching(&self, pred: impl Fn(&AttachedGroup) -> bool) -> Vec<Arc<CallbackGroup>> {
        let attachments = self.attachments.lock().unwrap_or_else(PoisonError::into_inner);
        attachments
            .groups
            .iter()
            .filter(|g| pred(g))
            .filter_map(|g| g.group.upgrade())
            .collect()
    }

    /// Walk attached nodes and groups and snapshot every live entity.
    ///
    /// Dropped nodes, groups and entities are pruned. Automatic groups
    /// created on an attached node after it was added are claimed here.
    pub fn collect_entities(&self) -> Result<EntitiesCollection, ExecutorError> {
        let mut attachments = self.lock_attachments()?;
        attachments.nodes.retain(|n| n.strong_count() > 0);
        attachments.groups.retain(|g| g.group.strong_count() > 0);

        let nodes: Vec<Arc<Node>> = attachments.nodes.iter().filter_map(Weak::upgrade).collect();
        let mut notify_guards = Vec::new();
        for node in &nodes {
            Self::attach_node_groups(&mut attachments, node);
            notify_guards.push(Arc::clone(node.notify_guard_condition()));
        }

        let mut entries = Vec::new();
        for attached in &attachments.groups {
            let Some(group) = attached.group.upgrade() else {
                continue;
            };
            notify_guards.push(Arc::clone(group.notify_guard_condition()));
            let weak_group = Arc::downgrade(&group);
            entries.extend(group.collect_all_ptrs().into_iter().map(|e| CollectionEntry {
                id: e.id,
                kind: e.kind,
                entity: e.entity,
                group: weak_group.clone(),
            }));
        }
        drop(attachments);

        let collection = EntitiesCollection::new(entries, notify_guards);
        debug!(executor = %self.id, entities = collection.len(), "entities collected");
        self.with_metrics(|m| m.record_rebuild());
        Ok(collection)
    }

    /// Number of live nodes attached.
    pub fn node_count(&self) -> usize {
        let attachments = self.attachments.lock().unwrap_or_else(PoisonError::into_inner);
        attachments.nodes.iter().filter(|n| n.strong_count() > 0).count()
    }

    // ── Execution claims ────────────────────────────────────────────

    pub fn is_executing(&self, id: EntityId) -> bool {
        self.executing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Reserve `id` and its group for one execution.
    pub fn try_claim(&self, id: EntityId, group: &CallbackGroup) -> bool {
        if !group.try_claim() {
            return false;
        }
        let inserted = self
            .executing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        if !inserted {
            group.release_claim();
        }
        inserted
    }

    pub fn release_claim(&self, id: EntityId, group: &CallbackGroup) {
        self.executing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        group.release_claim();
        if self.wake_on_release {
            self.interrupt_guard.trigger();
        }
    }
}

impl Drop for ExecutorCore {
    fn drop(&mut self) {
        let attachments = std::mem::take(
            self.attachments
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for group in attachments.groups.iter().filter_map(|g| g.group.upgrade()) {
            group.release_association();
        }
        for node in attachments.nodes.iter().filter_map(Weak::upgrade) {
            node.release_association();
        }
        debug!(executor = %self.id, "executor dropped, associations released");
    }
}
