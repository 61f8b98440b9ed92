use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::error::ExecutorError;

type Slot = Weak<dyn Any + Send + Sync>;

/// In-process rendezvous of publishers with subscriptions and clients with
/// services. Entries are weak: dropping the entity unregisters it.
#[derive(Default)]
pub(crate) struct Registry {
    topics: Mutex<HashMap<String, Vec<Slot>>>,
    services: Mutex<HashMap<String, Slot>>,
}

impl Registry {
    pub(crate) fn subscribe<T: Any + Send + Sync>(&self, topic: &str, inbox: &Arc<T>) {
        let erased: Arc<dyn Any + Send + Sync> = inbox.clone();
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let slots = topics.entry(topic.to_string()).or_default();
        slots.retain(|s| s.strong_count() > 0);
        slots.push(Arc::downgrade(&erased));
    }

    /// Live subscribers of `topic` whose inbox type is `T`.
    pub(crate) fn subscribers<T: Any + Send + Sync>(&self, topic: &str) -> Vec<Arc<T>> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slots) = topics.get_mut(topic) else {
            return Vec::new();
        };
        slots.retain(|s| s.strong_count() > 0);
        slots
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|s| s.downcast::<T>().ok())
            .collect()
    }

    pub(crate) fn advertise_service<T: Any + Send + Sync>(
        &self,
        name: &str,
        inbox: &Arc<T>,
    ) -> Result<(), ExecutorError> {
        let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
        if services.get(name).is_some_and(|s| s.strong_count() > 0) {
            return Err(ExecutorError::InvalidArgument(format!(
                "service '{name}' is already advertised"
            )));
        }
        let erased: Arc<dyn Any + Send + Sync> = inbox.clone();
        services.insert(name.to_string(), Arc::downgrade(&erased));
        Ok(())
    }

    pub(crate) fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
        services
            .get(name)
            .and_then(Weak::upgrade)
            .and_then(|s| s.downcast::<T>().ok())
    }
}
