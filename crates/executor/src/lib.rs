//! Executors for spindle callback groups.
//!
//! An [`Executor`] owns no entities. It borrows nodes and callback groups,
//! waits until one of their entities is ready, and runs it under the
//! group's exclusion rules. Four strategies share that contract; pick one
//! directly or through [`create_executor`] from an [`ExecutorConfig`].

pub mod any_executable;
pub mod collection;
pub mod config;
pub mod executor;
pub mod executors;
pub mod future;
pub mod metrics;

pub use any_executable::AnyExecutable;
pub use collection::{CollectionEntry, EntitiesCollection};
pub use config::{ConfigError, ExecutorConfig, ExecutorKind, ExecutorOptions};
pub use executor::{Executor, ExecutorCore, RebuildPolicy, SpinGuard, WaitDispatcher};
pub use executors::{
    create_executor, EventQueue, EventsExecutor, ExecutorEvent, ExecutorEventKind,
    MultiThreadedExecutor, SingleThreadedExecutor, StaticSingleThreadedExecutor,
};
pub use future::{
    spin_executor_until_future_complete, spin_node, spin_node_some, spin_node_until_future_complete,
    spin_until_future_complete, FutureReturnCode,
};
pub use metrics::ExecutorMetrics;

pub use spindle_core::{
    CallbackGroup, CallbackGroupType, Context, ExecutorError, GuardCondition, Node, Waitable,
};
