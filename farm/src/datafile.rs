//! The hierarchical dataset store.
//!
//! Persisted data lives under group paths ("pools/pool-0000/tasks/...")
//! with 2-D row-major datasets at the leaves and i32 attributes on
//! groups. A [`Store`] is a cheap handle describing where the data
//! lives; every checkpoint flush opens a [`Datafile`] from it, writes,
//! and closes it again so the on-disk state is consistent between
//! flushes.

pub mod memory;
pub mod sqlite;


pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{layout::DataType, MAX_RANK};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatafileError {
    #[error("SQLite operation failed")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no dataset at '{0}'")]
    MissingDataset(String),
    #[error("no attribute '{name}' on group '{path}'")]
    MissingAttribute { path: String, name: String },
    #[error("slab write out of bounds for dataset '{0}'")]
    SlabBounds(String),
    #[error("backup rotation failed")]
    Backup(#[from] std::io::Error),
}

/// Where the run's data lives. Cloned freely; opening is what costs.
#[derive(Debug, Clone)]
pub enum Store {
    Sqlite { dir: PathBuf, name: String },
    Memory(MemoryStore),
}

impl Store {
    pub fn open(&self) -> Result<Datafile, DatafileError> {
        match self {
            Store::Sqlite { .. } => Ok(Datafile::Sqlite(SqliteStore::open(&self.live_path()?)?)),
            Store::Memory(memory) => Ok(Datafile::Memory(memory.clone())),
        }
    }

    /// Path of the live datafile, the `-master-00` snapshot.
    fn live_path(&self) -> Result<PathBuf, DatafileError> {
        match self {
            Store::Sqlite { dir, name } => {
                Ok(dir.join(crate::checkpoint::backup::snapshot_name(name, 0)))
            }
            Store::Memory(_) => unreachable!("memory stores have no path"),
        }
    }

    /// Rotate the whole-file backup snapshots before a flush. In-memory
    /// stores have nothing to snapshot.
    pub fn rotate_backups(&self, retention: usize) -> Result<(), DatafileError> {
        match self {
            Store::Sqlite { dir, name } => {
                let mut blobs = crate::checkpoint::backup::FsBlobs::new(dir.clone());
                crate::checkpoint::backup::rotate(&mut blobs, name, retention)?;
                Ok(())
            }
            Store::Memory(_) => Ok(()),
        }
    }
}

/// An open store connection.
#[derive(Debug)]
pub enum Datafile {
    Sqlite(SqliteStore),
    Memory(MemoryStore),
}

impl Datafile {
    pub fn ensure_group(&mut self, path: &str) -> Result<(), DatafileError> {
        match self {
            Datafile::Sqlite(store) => store.ensure_group(path),
            Datafile::Memory(store) => store.ensure_group(path),
        }
    }

    /// Create a dataset if missing, zero-filled at its final shape.
    /// Existing datasets keep their contents; shapes never change after
    /// creation.
    pub fn ensure_dataset(
        &mut self,
        path: &str,
        dtype: DataType,
        dims: [usize; MAX_RANK],
    ) -> Result<(), DatafileError> {
        match self {
            Datafile::Sqlite(store) => store.ensure_dataset(path, dtype, dims),
            Datafile::Memory(store) => store.ensure_dataset(path, dtype, dims),
        }
    }

    /// Replace a dataset's contents wholesale.
    pub fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), DatafileError> {
        match self {
            Datafile::Sqlite(store) => store.write(path, bytes),
            Datafile::Memory(store) => store.write(path, bytes),
        }
    }

    /// Write one hyperslab: a `dims`-shaped block of elements placed at
    /// the element `offset` inside the dataset.
    pub fn write_slab(
        &mut self,
        path: &str,
        offset: [usize; MAX_RANK],
        dims: [usize; MAX_RANK],
        bytes: &[u8],
    ) -> Result<(), DatafileError> {
        match self {
            Datafile::Sqlite(store) => store.write_slab(path, offset, dims, bytes),
            Datafile::Memory(store) => store.write_slab(path, offset, dims, bytes),
        }
    }

    pub fn read(&mut self, path: &str) -> Result<Vec<u8>, DatafileError> {
        match self {
            Datafile::Sqlite(store) => store.read(path),
            Datafile::Memory(store) => store.read(path),
        }
    }

    pub fn set_attr(&mut self, group: &str, name: &str, value: i32) -> Result<(), DatafileError> {
        match self {
            Datafile::Sqlite(store) => store.set_attr(group, name, value),
            Datafile::Memory(store) => store.set_attr(group, name, value),
        }
    }

    pub fn attr(&mut self, group: &str, name: &str) -> Result<i32, DatafileError> {
        match self {
            Datafile::Sqlite(store) => store.attr(group, name),
            Datafile::Memory(store) => store.attr(group, name),
        }
    }

    pub fn close(self) -> Result<(), DatafileError> {
        match self {
            Datafile::Sqlite(store) => store.close(),
            Datafile::Memory(_) => Ok(()),
        }
    }
}

/// Number of bytes a `dims`-shaped block of `dtype` elements occupies.
pub(crate) fn block_bytes(dtype: DataType, dims: [usize; MAX_RANK]) -> usize {
    dims[0] * dims[1] * dtype.size()
}
