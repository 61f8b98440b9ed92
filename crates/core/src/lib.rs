//! Leaf building blocks of the spindle executor.
//!
//! Everything an executor schedules is a [`Waitable`]: it reports readiness
//! against a [`WaitSet`] snapshot, hands out its data exactly once per
//! readiness, and executes with that data. Waitables live in
//! [`CallbackGroup`]s, groups live on [`Node`]s, and every blocking wait is
//! woken through a [`GuardCondition`].

pub mod callback_group;
pub mod context;
pub mod entities;
pub mod error;
pub mod guard_condition;
pub mod node;
mod registry;
pub mod signal;
pub mod wait_set;
pub mod waitable;

pub use callback_group::{CallbackGroup, CallbackGroupType, EntityRef, TakeGate};
pub use context::{Context, ShutdownCallbackHandle};
pub use entities::{Client, Publisher, ResponseFuture, Service, Subscription, Timer, TimerHandle};
pub use error::ExecutorError;
pub use guard_condition::GuardCondition;
pub use node::Node;
pub use signal::{HandleId, Readiness, SignalListeners, WaitSignal};
pub use wait_set::{WaitResult, WaitResultKind, WaitSet};
pub use waitable::{AnyData, EntityId, EntityKind, ReadyCallback, Waitable};
