use thiserror::Error;

/// Errors raised by the scheduling layer and the entities it drives.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// A node or callback group is already owned by an executor.
    #[error("{kind} '{name}' has already been added to an executor")]
    AlreadyAttached { kind: &'static str, name: String },

    /// A node or callback group was never added to this executor.
    #[error("{kind} '{name}' is not associated with this executor")]
    NotAttached { kind: &'static str, name: String },

    /// A second `spin*` call was made while one is still active.
    #[error("{0}() called while already spinning")]
    ConcurrentSpin(&'static str),

    /// An entity was registered with a second callback group.
    #[error("entity '{0}' already belongs to a callback group")]
    AlreadyInGroup(String),

    /// A callback group was used with a node that does not own it.
    #[error("callback group is not owned by node '{0}'")]
    ForeignCallbackGroup(String),

    /// `take_data` was called without a matching readiness report.
    #[error("take_data called on '{0}' without a prior ready report")]
    TakeWithoutReady(String),

    /// A client sent a request to a service name nobody serves.
    #[error("service '{0}' is not available")]
    ServiceUnavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// Wait-set construction or waiting failed; fatal for the current spin.
    #[error("runtime fault: {0}")]
    RuntimeFault(String),
}

impl ExecutorError {
    /// Build a [`ExecutorError::LockPoisoned`] naming the guarded resource.
    pub fn poisoned(what: &str) -> Self {
        ExecutorError::LockPoisoned(what.to_string())
    }
}
