//! harrow-farm: a task-farm runtime for resumable parameter sweeps.
//!
//! One coordinator hands out board cells to a fixed fleet of workers,
//! collects heterogeneous per-task result banks, batches them into
//! checkpoint windows and commits the windows to a hierarchical dataset
//! store, so that a long sweep can resume from the last committed state.

pub mod checkpoint;
pub mod codec;
pub mod comm;
pub mod config;
pub mod datafile;
pub mod dispatch;
pub mod executors;
pub mod layout;
pub mod module;
pub mod modules;
pub mod pool;
pub mod restart;
pub mod signal;

use thiserror::Error;

/// Maximum rank of any storage bank. Banks are always laid out as 2-D
/// row-major grids; 1-D data uses a single row.
pub const MAX_RANK: usize = 2;

/// Everything that can abort a run, phase-labelled for diagnostics.
#[derive(Error, Debug)]
pub enum FarmError {
    #[error("storage layout failure")]
    Storage(#[from] layout::StorageError),
    #[error("datafile failure")]
    Datafile(#[from] datafile::DatafileError),
    #[error("transport failure")]
    Comm(#[from] comm::CommError),
    #[error("user hook failure")]
    Hook(#[from] module::HookError),
    #[error("module failed to load")]
    Module(#[from] module::ModuleError),
    #[error("unexpected message tag {tag}")]
    Protocol { tag: i32 },
    #[error("frame length mismatch: expected {expected} bytes, got {got}")]
    Frame { expected: usize, got: usize },
    #[error("checkpoint window overflow")]
    WindowOverflow,
    #[error("not enough workers: module requires {required}, {available} available")]
    NotEnoughWorkers { required: usize, available: usize },
    #[error("executor failure: {reason}")]
    Executor { reason: String },
    #[error("interrupt signal observed, checkpoint flushed")]
    Interrupted,
}

impl FarmError {
    /// The failing phase, as reported to the user on abnormal termination.
    pub fn phase(&self) -> &'static str {
        match self {
            FarmError::Storage(layout::StorageError::OutOfMemory { .. }) => "allocation",
            FarmError::Storage(_) => "layout",
            FarmError::Datafile(_) => "persistence",
            FarmError::Comm(_)
            | FarmError::Protocol { .. }
            | FarmError::Frame { .. }
            | FarmError::Hook(_)
            | FarmError::Module(_)
            | FarmError::Executor { .. }
            | FarmError::NotEnoughWorkers { .. } => "dispatch",
            FarmError::WindowOverflow => "checkpoint",
            FarmError::Interrupted => "interrupt",
        }
    }
}
