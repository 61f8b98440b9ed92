use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::context::Context;
use crate::error::ExecutorError;
use crate::wait_set::{WaitResult, WaitSet};
use crate::waitable::{AnyData, EntityKind, ReadyCallback, Waitable};

use super::inbox::Inbox;

/// Receives messages published on a topic within the same context.
pub struct Subscription<T> {
    topic: String,
    inbox: Arc<Inbox<T>>,
    callback: Box<dyn Fn(T) + Send + Sync>,
}

impl<T: Send + 'static> Subscription<T> {
    pub(crate) fn new<F>(context: &Context, topic: &str, depth: usize, callback: F) -> Arc<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let inbox = Inbox::new(depth);
        context.registry().subscribe(topic, &inbox);
        Arc::new(Self {
            topic: topic.to_string(),
            inbox,
            callback: Box::new(callback),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Messages waiting to be taken.
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }
}

impl<T: Send + 'static> Waitable for Subscription<T> {
    fn kind(&self) -> EntityKind {
        EntityKind::Subscription
    }

    fn name(&self) -> &str {
        &self.topic
    }

    fn add_to_wait_set(&self, wait_set: &mut WaitSet) {
        wait_set.add_guard_condition(self.inbox.guard());
    }

    fn is_ready(&self, result: &WaitResult) -> bool {
        result.is_guard_ready(self.inbox.guard().id())
    }

    fn take_data(&self) -> Result<Option<AnyData>, ExecutorError> {
        Ok(self.inbox.take().map(|msg| Box::new(msg) as AnyData))
    }

    fn execute(&self, data: AnyData) -> Result<(), ExecutorError> {
        let msg = data.downcast::<T>().map_err(|_| {
            ExecutorError::InvalidArgument(format!("unexpected message type on '{}'", self.topic))
        })?;
        (self.callback)(*msg);
        Ok(())
    }

    fn supports_on_ready_callback(&self) -> bool {
        true
    }

    fn set_on_ready_callback(&self, callback: ReadyCallback) {
        self.inbox
            .guard()
            .set_on_trigger_callback(Some(Box::new(move |count| callback(count, 0))));
    }

    fn clear_on_ready_callback(&self) {
        self.inbox.guard().set_on_trigger_callback(None);
    }
}

/// Publishes messages to every live subscription on a topic.
pub struct Publisher<T> {
    topic: String,
    context: Arc<Context>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    pub(crate) fn new(context: Arc<Context>, topic: &str) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.to_string(),
            context,
            _marker: PhantomData,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Deliver `msg` to all matching subscriptions. Returns how many received it.
    pub fn publish(&self, msg: T) -> Result<usize, ExecutorError> {
        if !self.context.is_valid() {
            return Err(ExecutorError::InvalidArgument(format!(
                "cannot publish on '{}': context is shut down",
                self.topic
            )));
        }
        let subscribers = self.context.registry().subscribers::<Inbox<T>>(&self.topic);
        for inbox in &subscribers {
            if inbox.deliver(msg.clone()) {
                warn!(topic = %self.topic, "subscription queue full, oldest message dropped");
            }
        }
        trace!(topic = %self.topic, receivers = subscribers.len(), "published");
        Ok(subscribers.len())
    }

    pub fn subscription_count(&self) -> usize {
        self.context
            .registry()
            .subscribers::<Inbox<T>>(&self.topic)
            .len()
    }
}
