//! Concrete scheduling strategies.

mod events;
mod multi_threaded;
mod single_threaded;
mod static_single_threaded;

pub use self::events::{EventQueue, EventsExecutor, ExecutorEvent, ExecutorEventKind};
pub use self::multi_threaded::MultiThreadedExecutor;
pub use self::single_threaded::SingleThreadedExecutor;
pub use self::static_single_threaded::StaticSingleThreadedExecutor;

use crate::config::{ExecutorKind, ExecutorOptions};
use crate::executor::Executor;

/// Build the strategy named by `options.config.kind`.
pub fn create_executor(options: ExecutorOptions) -> Box<dyn Executor> {
    match options.config.kind {
        ExecutorKind::SingleThreaded => Box::new(SingleThreadedExecutor::new(options)),
        ExecutorKind::MultiThreaded => Box::new(MultiThreadedExecutor::new(options)),
        ExecutorKind::StaticSingleThreaded => Box::new(StaticSingleThreadedExecutor::new(options)),
        ExecutorKind::Events => Box::new(EventsExecutor::new(options)),
    }
}
