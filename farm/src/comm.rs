//! Transport collaborator: blocking, ordered, reliable point-to-point
//! message passing between the coordinator and a fixed set of workers.
//!
//! The engine only ever talks to these two traits; the shipped
//! implementation is an in-process channel fabric.

pub mod channel;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CommError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("short frame of {got} bytes")]
    ShortFrame { got: usize },
}

/// Which side of the protocol a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker,
}

/// Coordinator-side endpoint. Sends are addressed per worker slot;
/// receives return the first message from any worker, in arrival order.
pub trait CoordinatorPort {
    fn workers(&self) -> usize;

    fn send(&self, worker: usize, frame: Vec<u8>) -> Result<(), CommError>;

    fn recv_any(&self) -> Result<(usize, Vec<u8>), CommError>;

    /// Deliver one frame to every worker. Acts as a synchronization
    /// barrier: workers block on the matching receive.
    fn broadcast(&self, frame: Vec<u8>) -> Result<(), CommError>;
}

/// Worker-side endpoint, paired with exactly one coordinator.
pub trait WorkerPort {
    fn id(&self) -> usize;

    fn send(&self, frame: Vec<u8>) -> Result<(), CommError>;

    fn recv(&self) -> Result<Vec<u8>, CommError>;
}
