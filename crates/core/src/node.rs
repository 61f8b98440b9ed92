use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tracing::debug;

use crate::callback_group::{CallbackGroup, CallbackGroupType};
use crate::context::Context;
use crate::entities::{Client, Publisher, Service, Subscription, Timer};
use crate::error::ExecutorError;
use crate::guard_condition::GuardCondition;
use crate::waitable::{EntityId, Waitable};

/// A named owner of callback groups and the entities inside them.
///
/// The default group is mutually exclusive and added to an executor
/// together with the node. Further groups are held weakly: dropping the
/// last application handle retires the group and its entities.
pub struct Node {
    name: String,
    namespace: String,
    context: Arc<Context>,
    default_group: Arc<CallbackGroup>,
    groups: Mutex<Vec<Weak<CallbackGroup>>>,
    associated: AtomicBool,
    notify_guard: Arc<GuardCondition>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.fully_qualified_name())
            .field("associated", &self.is_associated_with_executor())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<(), ExecutorError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ExecutorError::InvalidArgument(format!("invalid node name '{name}'")))
    }
}

impl Node {
    /// Create a node in the root namespace of the global context.
    pub fn new(name: &str) -> Result<Arc<Self>, ExecutorError> {
        Self::with_context(name, Context::global())
    }

    pub fn with_context(name: &str, context: Arc<Context>) -> Result<Arc<Self>, ExecutorError> {
        Self::with_namespace(name, "/", context)
    }

    pub fn with_namespace(
        name: &str,
        namespace: &str,
        context: Arc<Context>,
    ) -> Result<Arc<Self>, ExecutorError> {
        validate_name(name)?;
        if !namespace.starts_with('/') {
            return Err(ExecutorError::InvalidArgument(format!(
                "namespace '{namespace}' must be absolute"
            )));
        }
        let namespace = match namespace.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        debug!(node = name, namespace = %namespace, "node created");
        Ok(Arc::new(Self {
            name: name.to_string(),
            namespace,
            context,
            default_group: CallbackGroup::new(CallbackGroupType::MutuallyExclusive, true),
            groups: Mutex::new(Vec::new()),
            associated: AtomicBool::new(false),
            notify_guard: GuardCondition::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn fully_qualified_name(&self) -> String {
        if self.namespace == "/" {
            format!("/{}", self.name)
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn default_callback_group(&self) -> &Arc<CallbackGroup> {
        &self.default_group
    }

    /// Triggered whenever the node gains a callback group.
    pub fn notify_guard_condition(&self) -> &Arc<GuardCondition> {
        &self.notify_guard
    }

    pub fn create_callback_group(
        &self,
        kind: CallbackGroupType,
        automatically_add_to_executor_with_node: bool,
    ) -> Arc<CallbackGroup> {
        let group = CallbackGroup::new(kind, automatically_add_to_executor_with_node);
        {
            let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
            groups.retain(|g| g.strong_count() > 0);
            groups.push(Arc::downgrade(&group));
        }
        self.notify_guard.trigger();
        group
    }

    /// Live groups, default group first.
    pub fn callback_groups(&self) -> Vec<Arc<CallbackGroup>> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        groups.retain(|g| g.strong_count() > 0);
        std::iter::once(Arc::clone(&self.default_group))
            .chain(groups.iter().filter_map(Weak::upgrade))
            .collect()
    }

    pub fn owns_callback_group(&self, group: &Arc<CallbackGroup>) -> bool {
        self.callback_groups().iter().any(|g| Arc::ptr_eq(g, group))
    }

    /// Register an entity with one of this node's groups (default if `None`).
    pub fn add_waitable(
        &self,
        entity: Arc<dyn Waitable>,
        group: Option<&Arc<CallbackGroup>>,
    ) -> Result<EntityId, ExecutorError> {
        let groups = self.callback_groups();
        let target = match group {
            Some(g) if groups.iter().any(|owned| Arc::ptr_eq(owned, g)) => Arc::clone(g),
            Some(_) => return Err(ExecutorError::ForeignCallbackGroup(self.fully_qualified_name())),
            None => Arc::clone(&self.default_group),
        };
        if groups.iter().any(|g| g.contains(&entity)) {
            return Err(ExecutorError::AlreadyInGroup(entity.name().to_string()));
        }
        let id = target.add_entity(&entity)?;
        debug!(node = %self.fully_qualified_name(), entity = entity.name(), kind = %entity.kind(), %id, "entity registered");
        Ok(id)
    }

    pub fn remove_waitable(&self, entity: &Arc<dyn Waitable>) -> bool {
        self.callback_groups()
            .iter()
            .any(|g| g.remove_entity(entity))
    }

    pub fn create_timer<F>(
        &self,
        period: Duration,
        group: Option<&Arc<CallbackGroup>>,
        callback: F,
    ) -> Result<Arc<Timer>, ExecutorError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let timer = Timer::new(format!("{}/timer", self.fully_qualified_name()), period, callback);
        self.add_waitable(timer.clone(), group)?;
        Ok(timer)
    }

    pub fn create_subscription<T, F>(
        &self,
        topic: &str,
        depth: usize,
        group: Option<&Arc<CallbackGroup>>,
        callback: F,
    ) -> Result<Arc<Subscription<T>>, ExecutorError>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let subscription = Subscription::new(&self.context, topic, depth, callback);
        self.add_waitable(subscription.clone(), group)?;
        Ok(subscription)
    }

    pub fn create_publisher<T>(&self, topic: &str) -> Arc<Publisher<T>>
    where
        T: Clone + Send + 'static,
    {
        Publisher::new(Arc::clone(&self.context), topic)
    }

    pub fn create_service<Req, Resp, F>(
        &self,
        name: &str,
        group: Option<&Arc<CallbackGroup>>,
        callback: F,
    ) -> Result<Arc<Service<Req, Resp>>, ExecutorError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        let service = Service::new(&self.context, name, callback)?;
        self.add_waitable(service.clone(), group)?;
        Ok(service)
    }

    pub fn create_client<Req, Resp>(
        &self,
        name: &str,
        group: Option<&Arc<CallbackGroup>>,
    ) -> Result<Arc<Client<Req, Resp>>, ExecutorError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let client = Client::new(Arc::clone(&self.context), name);
        self.add_waitable(client.clone(), group)?;
        Ok(client)
    }

    /// Mark the node as owned by an executor. Fails if already owned.
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
