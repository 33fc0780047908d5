//! Runtime error type

use vigil_bus::BusError;
use vigil_cycle::TriggerError;
use vigil_memory::MemoryError;

use crate::config::ConfigError;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("event bus: {0}")]
    Bus(#[from] BusError),

    #[error("memory: {0}")]
    Memory(#[from] MemoryError),

    #[error("trigger: {0}")]
    Trigger(#[from] TriggerError),

    #[error("runtime requires a tokio runtime context")]
    NoAsyncRuntime,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
