//! The storage layout engine.
//!
//! Every memory/storage bank is described by a [`Schema`]; this module
//! validates and fixes up schemas, allocates the backing buffers, derives
//! persisted dataset shapes per mapping policy and computes the hyperslab
//! offsets used when committing task results.

pub mod view;

#[cfg(test)]
mod offsets_test;

use crate::{
    datafile::Datafile,
    module::FarmModule,
    pool::Pool,
    FarmError, MAX_RANK,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("rank {rank} of bank '{path}' out of range, must be {MAX_RANK}")]
    InvalidRank { path: String, rank: usize },
    #[error("invalid size for dimension {axis} of bank '{path}'")]
    InvalidDim { path: String, axis: usize },
    #[error("a storage path is required for persisted banks")]
    MissingPath,
    #[error("module declared {declared} banks, {limit} allowed")]
    TooManyBanks { declared: usize, limit: usize },
    #[error("failed to allocate {bytes} bytes")]
    OutOfMemory { bytes: usize },
}

/// Element datatype of a bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F64,
    I32,
}

impl DataType {
    /// size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            DataType::F64 => 8,
            DataType::I32 => 4,
        }
    }

    /// integer tag used by the dataset store
    pub fn tag(&self) -> i32 {
        match self {
            DataType::F64 => 1,
            DataType::I32 => 2,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(DataType::F64),
            2 => Some(DataType::I32),
            _ => None,
        }
    }
}

/// How a task-level bank maps into the pool-wide persisted dataset.
///
/// Pool-level banks always use `Group`. Task-level banks pick one of the
/// streamed layouts (`Pm3d`, `List`, `Board`) or `Basic` for one dataset
/// per task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingPolicy {
    Group,
    Basic,
    Pm3d,
    List,
    Board,
}

impl MappingPolicy {
    /// streamed policies share one dataset addressed by offset arithmetic
    pub fn is_streamed(&self) -> bool {
        matches!(
            self,
            MappingPolicy::Pm3d | MappingPolicy::List | MappingPolicy::Board
        )
    }
}

/// Layout descriptor for one data bank.
///
/// The derived fields (`elements`, `byte_size`, `offset`) are recomputed by
/// [`check_layout`] and must never be set by module code.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub path: String,
    pub rank: usize,
    pub dims: [usize; MAX_RANK],
    pub dtype: DataType,
    pub policy: MappingPolicy,
    /// write this bank to the dataset store on checkpoint
    pub persist: bool,
    /// broadcast this bank to all workers
    pub sync: bool,
    pub elements: usize,
    pub byte_size: usize,
    pub offset: [usize; MAX_RANK],
}

impl Schema {
    pub fn new(path: &str, dims: [usize; MAX_RANK], dtype: DataType, policy: MappingPolicy) -> Self {
        Self {
            path: path.to_owned(),
            rank: MAX_RANK,
            dims,
            dtype,
            policy,
            persist: false,
            sync: true,
            elements: 0,
            byte_size: 0,
            offset: [0; MAX_RANK],
        }
    }

    /// shorthand for a bank that is both broadcast and persisted
    pub fn persisted(
        path: &str,
        dims: [usize; MAX_RANK],
        dtype: DataType,
        policy: MappingPolicy,
    ) -> Self {
        let mut schema = Self::new(path, dims, dtype, policy);
        schema.persist = true;
        schema
    }
}

/// A schema plus its owned, contiguously allocated buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Bank {
    pub layout: Schema,
    pub data: Vec<u8>,
}

impl Bank {
    /// a bank with no buffer yet; [`commit_memory_layout`] allocates it
    pub fn new(layout: Schema) -> Self {
        Self {
            layout,
            data: Vec::new(),
        }
    }

    pub fn allocate(&mut self) -> Result<(), StorageError> {
        let bytes = self.layout.byte_size;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| StorageError::OutOfMemory { bytes })?;
        data.resize(bytes, 0);
        self.data = data;
        Ok(())
    }

    pub fn grid<T: view::Element>(&self) -> view::GridView<'_, T> {
        view::GridView::new(&self.data, &self.layout)
    }

    pub fn grid_mut<T: view::Element>(&mut self) -> view::GridViewMut<'_, T> {
        view::GridViewMut::new(&mut self.data, &self.layout)
    }
}

/// Validate and fix up a set of schemas.
///
/// Recomputes the derived fields, so re-running on an already checked
/// schema is a no-op. Persisted banks require a path, get their offsets
/// zeroed and are forced to `sync` (offsets are calculated automatically
/// at checkpoint time).
pub fn check_layout<'a, I>(schemas: I) -> Result<(), StorageError>
where
    I: IntoIterator<Item = &'a mut Schema>,
{
    for schema in schemas {
        check_schema(schema)?;
    }

    Ok(())
}

pub fn check_schema(schema: &mut Schema) -> Result<(), StorageError> {
    if schema.rank < 2 || schema.rank > MAX_RANK {
        return Err(StorageError::InvalidRank {
            path: schema.path.clone(),
            rank: schema.rank,
        });
    }

    for axis in 0..schema.rank {
        if schema.dims[axis] == 0 {
            return Err(StorageError::InvalidDim {
                path: schema.path.clone(),
                axis,
            });
        }
    }

    if schema.persist {
        if schema.path.is_empty() {
            return Err(StorageError::MissingPath);
        }

        if !schema.sync {
            warn!(
                path = %schema.path,
                "The sync flag must be enabled for persisted banks. Fixing"
            );
            schema.sync = true;
        }

        schema.offset = [0; MAX_RANK];
    }

    schema.elements = schema.dims[..schema.rank].iter().product();
    schema.byte_size = schema.elements * schema.dtype.size();

    Ok(())
}

/// Allocate the in-memory buffer of every bank.
///
/// This must run identically on every participating process -- the sizes of
/// the buffers broadcast between processes depend on it.
pub fn commit_memory_layout(banks: &mut [Bank]) -> Result<(), StorageError> {
    for bank in banks.iter_mut() {
        bank.allocate()?;
    }

    Ok(())
}

/// Persisted dataset shape for a bank under the given mapping policy.
///
/// The same rule is used when the dataset is created and when runtime write
/// offsets are derived, so the two can never disagree.
pub fn dataset_dims(
    policy: MappingPolicy,
    bank_dims: [usize; MAX_RANK],
    board_dims: [usize; MAX_RANK],
) -> [usize; MAX_RANK] {
    match policy {
        MappingPolicy::Group | MappingPolicy::Basic => bank_dims,
        MappingPolicy::Pm3d | MappingPolicy::List => {
            [bank_dims[0] * board_dims[0] * board_dims[1], bank_dims[1]]
        }
        MappingPolicy::Board => [bank_dims[0] * board_dims[0], bank_dims[1] * board_dims[1]],
    }
}

/// Hyperslab offset of one task's sub-region within the pool-wide dataset.
pub fn slab_offset(
    policy: MappingPolicy,
    bank_dims: [usize; MAX_RANK],
    board_dims: [usize; MAX_RANK],
    tid: i32,
    location: [usize; MAX_RANK],
) -> [usize; MAX_RANK] {
    match policy {
        MappingPolicy::Group | MappingPolicy::Basic => [0, 0],
        MappingPolicy::Pm3d => [
            (location[0] + board_dims[0] * location[1]) * bank_dims[0],
            0,
        ],
        MappingPolicy::List => [tid as usize * bank_dims[0], 0],
        MappingPolicy::Board => [location[0] * bank_dims[0], location[1] * bank_dims[1]],
    }
}

/// Idempotently create the persisted container hierarchy for a pool.
///
/// Builds the pool's own group, the board and pool-level datasets, the
/// "tasks" sub-group, and either one shared dataset per streamed task bank
/// or one dataset per task id for `Basic` banks. Finally records the pool
/// as the most recent one in the "last" pointer read back at restart.
pub fn commit_storage_layout(
    store: &mut Datafile,
    pool: &Pool,
    module: &dyn FarmModule,
) -> Result<(), FarmError> {
    store.ensure_group("pools")?;

    let group = pool.group();
    store.ensure_group(&group)?;

    let board_dims = pool.board_layout.dims;
    create_dataset(store, &group, &pool.board_layout, board_dims, module)?;

    for bank in pool.storage.iter().filter(|bank| bank.layout.persist) {
        create_dataset(store, &group, &bank.layout, board_dims, module)?;
    }

    let tasks = format!("{group}/tasks");
    store.ensure_group(&tasks)?;

    for schema in pool.task_template.iter().filter(|schema| schema.persist) {
        if schema.policy.is_streamed() {
            create_dataset(store, &tasks, schema, board_dims, module)?;
        } else {
            for tid in 0..pool.pool_size {
                let task_group = format!("{tasks}/task-{tid:04}");
                store.ensure_group(&task_group)?;
                create_dataset(store, &task_group, schema, board_dims, module)?;
            }
        }
    }

    store.ensure_group("last")?;
    store.set_attr("last", "id", pool.pid as i32)?;

    Ok(())
}

fn create_dataset(
    store: &mut Datafile,
    group: &str,
    schema: &Schema,
    board_dims: [usize; MAX_RANK],
    module: &dyn FarmModule,
) -> Result<(), FarmError> {
    let dims = dataset_dims(schema.policy, schema.dims, board_dims);
    let path = format!("{group}/{}", schema.path);

    store.ensure_dataset(&path, schema.dtype, dims)?;
    module.dataset_prepare(store, &path, schema)?;

    Ok(())
}
