//! The pluggable hook surface.
//!
//! A module implements [`FarmModule`] -- one method per extension point,
//! all defaulted, so absence of a hook is never an error. Modules are
//! selected by name at configuration time and held as a single trait
//! object handle; the engine never knows how the hook was resolved.

use crate::{
    checkpoint::Checkpoint,
    datafile::Datafile,
    layout::Schema,
    modules,
    pool::{Pool, Task},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("module '{0}' is not supported")]
    Unsupported(String),
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error("hook '{hook}' failed: {reason}")]
    Failed { hook: &'static str, reason: String },
}

impl HookError {
    pub fn new(hook: &'static str, reason: impl Into<String>) -> Self {
        Self::Failed {
            hook,
            reason: reason.into(),
        }
    }
}

/// Counts and limits a module declares before any pool opens.
#[derive(Debug, Clone)]
pub struct InitSpec {
    /// upper bound on the number of pool generations
    pub pools: usize,
    pub banks_per_pool: usize,
    pub banks_per_task: usize,
    pub min_workers: usize,
}

impl Default for InitSpec {
    fn default() -> Self {
        Self {
            pools: 64,
            banks_per_pool: 8,
            banks_per_task: 8,
            min_workers: 1,
        }
    }
}

/// What the task-process hook wants done with the task afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskVerdict {
    Done,
    /// release the task's banks immediately after the result is sent
    Finalize,
}

/// Whether the sweep continues with another pool generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolVerdict {
    CreateNextPool,
    Finalize,
}

impl PoolVerdict {
    pub fn tag(&self) -> i32 {
        match self {
            PoolVerdict::CreateNextPool => 1,
            PoolVerdict::Finalize => 0,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(PoolVerdict::CreateNextPool),
            0 => Some(PoolVerdict::Finalize),
            _ => None,
        }
    }
}

#[allow(unused_variables)]
pub trait FarmModule: Send {
    /// declare pool/bank counts and the minimum worker count
    fn init(&mut self, spec: &mut InitSpec) -> Result<(), HookError> {
        Ok(())
    }

    /// declare the storage banks of a freshly opened pool
    fn storage(&self, pool: &mut Pool) -> Result<(), HookError> {
        Ok(())
    }

    /// populate a freshly opened pool's banks, optionally from prior pools
    fn pool_prepare(&self, prior: &[Pool], current: &mut Pool) -> Result<(), HookError> {
        Ok(())
    }

    /// worker-side setup before a task is processed
    fn task_prepare(&self, pool: &Pool, task: &mut Task) -> Result<(), HookError> {
        Ok(())
    }

    /// the per-task computation
    fn task_process(&self, pool: &Pool, task: &mut Task) -> Result<TaskVerdict, HookError> {
        Ok(TaskVerdict::Done)
    }

    /// decide whether the sweep continues after a pool is fully computed
    fn pool_process(&self, prior: &[Pool], current: &Pool) -> Result<PoolVerdict, HookError> {
        Ok(PoolVerdict::Finalize)
    }

    /// custom metadata just before a checkpoint window is committed
    fn checkpoint_prepare(&self, pool: &Pool, checkpoint: &mut Checkpoint) -> Result<(), HookError> {
        Ok(())
    }

    /// custom metadata right after a persisted dataset is created
    fn dataset_prepare(
        &self,
        store: &mut Datafile,
        path: &str,
        layout: &Schema,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Resolve a module by name from the built-in registry.
pub fn load(name: &str) -> Result<Box<dyn FarmModule>, ModuleError> {
    match name {
        "default" => Ok(Box::new(modules::default::DefaultModule)),
        "sweep" => Ok(Box::<modules::sweep::SweepModule>::default()),
        _ => Err(ModuleError::Unsupported(name.to_owned())),
    }
}
