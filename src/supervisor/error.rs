//! Supervisor errors.

use std::fmt;

use super::PoolState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// `run` was called on a pool that already left `Idle`.
    AlreadyStarted,
    /// The operation needs a running pool.
    NotRunning(PoolState),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::AlreadyStarted => write!(f, "worker pool already started"),
            SupervisorError::NotRunning(state) => write!(f, "worker pool is {}", state),
        }
    }
}

impl std::error::Error for SupervisorError {}
