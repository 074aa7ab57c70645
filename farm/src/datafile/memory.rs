//! In-memory dataset store, used by embedders and the test suite. All
//! clones share one map, mirroring how every `Store::open` of a SQLite
//! store lands on the same file.

use super::{block_bytes, sqlite::splice_slab, DatafileError};
use crate::{layout::DataType, MAX_RANK};
use parking_lot::FairMutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

#[derive(Debug, Clone)]
struct MemDataset {
    dtype: DataType,
    shape: [usize; MAX_RANK],
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct InnerMemory {
    groups: BTreeSet<String>,
    datasets: BTreeMap<String, MemDataset>,
    attributes: BTreeMap<(String, String), i32>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Arc<FairMutex<InnerMemory>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_group(&mut self, path: &str) -> Result<(), DatafileError> {
        self.0.lock().groups.insert(path.to_owned());

        Ok(())
    }

    pub fn ensure_dataset(
        &mut self,
        path: &str,
        dtype: DataType,
        dims: [usize; MAX_RANK],
    ) -> Result<(), DatafileError> {
        self.0
            .lock()
            .datasets
            .entry(path.to_owned())
            .or_insert_with(|| MemDataset {
                dtype,
                shape: dims,
                data: vec![0u8; block_bytes(dtype, dims)],
            });

        Ok(())
    }

    pub fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), DatafileError> {
        let mut inner = self.0.lock();
        let dataset = inner
            .datasets
            .get_mut(path)
            .ok_or_else(|| DatafileError::MissingDataset(path.to_owned()))?;
        dataset.data = bytes.to_vec();

        Ok(())
    }

    pub fn write_slab(
        &mut self,
        path: &str,
        offset: [usize; MAX_RANK],
        dims: [usize; MAX_RANK],
        bytes: &[u8],
    ) -> Result<(), DatafileError> {
        let mut inner = self.0.lock();
        let dataset = inner
            .datasets
            .get_mut(path)
            .ok_or_else(|| DatafileError::MissingDataset(path.to_owned()))?;

        splice_slab(
            path,
            dataset.dtype,
            dataset.shape,
            &mut dataset.data,
            offset,
            dims,
            bytes,
        )
    }

    pub fn read(&mut self, path: &str) -> Result<Vec<u8>, DatafileError> {
        self.0
            .lock()
            .datasets
            .get(path)
            .map(|dataset| dataset.data.clone())
            .ok_or_else(|| DatafileError::MissingDataset(path.to_owned()))
    }

    pub fn set_attr(&mut self, group: &str, name: &str, value: i32) -> Result<(), DatafileError> {
        self.0
            .lock()
            .attributes
            .insert((group.to_owned(), name.to_owned()), value);

        Ok(())
    }

    pub fn attr(&mut self, group: &str, name: &str) -> Result<i32, DatafileError> {
        self.0
            .lock()
            .attributes
            .get(&(group.to_owned(), name.to_owned()))
            .copied()
            .ok_or_else(|| DatafileError::MissingAttribute {
                path: group.to_owned(),
                name: name.to_owned(),
            })
    }
}
