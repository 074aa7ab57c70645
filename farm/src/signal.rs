//! Graceful interrupt plumbing.
//!
//! Two paths into the same behavior: a raised flag (process-wide for
//! SIGINT, shared for embedders) and an "ice" sentinel file checked once
//! per coordinator iteration. Both drain into the same flush-then-exit
//! sequence in the dispatch loop.

use once_cell::sync::Lazy;
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

static PROCESS_INTERRUPT: AtomicBool = AtomicBool::new(false);

static ICE_SUFFIX: Lazy<String> = Lazy::new(|| ".ice".to_owned());

/// Raise the process-wide interrupt flag. Only touches an atomic, so it
/// is safe to call from a signal handler.
pub fn raise_process_flag() {
    PROCESS_INTERRUPT.store(true, Ordering::SeqCst);
}

/// Interrupt flag checked by the coordinator between messages.
#[derive(Debug, Clone)]
pub enum Flag {
    /// the process-wide flag raised by the SIGINT handler
    Process,
    /// an embedder-owned flag, one per run
    Shared(Arc<AtomicBool>),
}

impl Flag {
    pub fn process() -> Self {
        Flag::Process
    }

    pub fn shared() -> Self {
        Flag::Shared(Arc::new(AtomicBool::new(false)))
    }

    pub fn raise(&self) {
        match self {
            Flag::Process => raise_process_flag(),
            Flag::Shared(flag) => flag.store(true, Ordering::SeqCst),
        }
    }

    pub fn is_raised(&self) -> bool {
        match self {
            Flag::Process => PROCESS_INTERRUPT.load(Ordering::SeqCst),
            Flag::Shared(flag) => flag.load(Ordering::SeqCst),
        }
    }
}

/// True when the run's ice file exists, e.g. `touch harrow.ice` next to
/// the datafile requests a checkpoint-and-exit without signals.
pub fn iced(name: &str) -> bool {
    Path::new(&format!("{name}{}", *ICE_SUFFIX)).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_flag_raises_independently() {
        let flag = Flag::shared();
        assert!(!flag.is_raised());

        let copy = flag.clone();
        copy.raise();
        assert!(flag.is_raised());
    }

    #[test]
    fn ice_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("run").to_string_lossy().into_owned();

        assert!(!iced(&name));
        std::fs::write(format!("{name}.ice"), b"").unwrap();
        assert!(iced(&name));
    }
}
