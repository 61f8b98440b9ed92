//! In-process entity kinds driven by an executor.

mod inbox;
mod service;
mod subscription;
mod timer;

pub use service::{Client, ResponseFuture, Service};
pub use subscription::{Publisher, Subscription};
pub use timer::{Timer, TimerHandle};
