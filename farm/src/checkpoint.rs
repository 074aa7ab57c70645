//! The checkpoint engine.
//!
//! Incoming result frames are staged verbatim into a fixed-size window;
//! when the window fills (or an interrupt arrives) the whole window is
//! committed to the dataset store in one open-write-close cycle,
//! preceded by a snapshot rotation. Window rows reuse the wire frame
//! layout, so staging is a plain byte copy and the codec's sync filter
//! decides which bank bytes exist in a row.

pub mod backup;

#[cfg(test)]
mod backup_test;
#[cfg(test)]
mod checkpoint_test;

use crate::{
    codec::{frame_len, EMPTY_TID, HEADER_BYTES},
    datafile::Store,
    layout::{self, Bank, MappingPolicy},
    pool::{Pool, TaskStatus},
    FarmError, MAX_RANK,
};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info};

/// Effective window size: the largest multiple of the worker count not
/// above the target, never zero.
pub fn window_size(target: usize, workers: usize) -> usize {
    let size = (target / workers) * workers;
    if size == 0 {
        workers
    } else {
        size
    }
}

/// One checkpoint window of staged result frames.
#[derive(Debug)]
pub struct Checkpoint {
    /// id of the window, counted from zero per pool
    pub cid: i32,
    pub size: usize,
    counter: usize,
    record_len: usize,
    data: Vec<u8>,
}

impl Checkpoint {
    pub fn open(pool: &Pool, workers: usize, target: usize) -> Self {
        let size = window_size(target, workers);
        let record_len = frame_len(&pool.task_template);

        let mut checkpoint = Self {
            cid: 0,
            size,
            counter: 0,
            record_len,
            data: vec![0u8; size * record_len],
        };
        checkpoint.empty_records();

        debug!(
            size = size,
            record_len = record_len,
            "Opened checkpoint window"
        );

        checkpoint
    }

    fn empty_records(&mut self) {
        self.data.fill(0);
        for row in 0..self.size {
            LittleEndian::write_i32(&mut self.data[row * self.record_len + 4..], EMPTY_TID);
        }
    }

    /// Stage one received frame into the next free row.
    pub fn stage(&mut self, frame: &[u8]) -> Result<(), FarmError> {
        if self.counter == self.size {
            return Err(FarmError::WindowOverflow);
        }
        if frame.len() != self.record_len {
            return Err(FarmError::Frame {
                expected: self.record_len,
                got: frame.len(),
            });
        }

        let at = self.counter * self.record_len;
        self.data[at..at + self.record_len].copy_from_slice(frame);
        self.counter += 1;

        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.counter == self.size
    }

    pub fn len(&self) -> usize {
        self.counter
    }

    pub fn is_empty(&self) -> bool {
        self.counter == 0
    }

    /// staged rows, empty slots included
    pub fn records(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.record_len)
    }

    /// Start the next window; rows are re-emptied, the buffer is reused.
    pub fn reset(&mut self, cid: i32) {
        self.cid = cid;
        self.counter = 0;
        self.empty_records();
    }

    /// Commit the window: rotate the snapshots, then write the board,
    /// the persisted pool banks and every staged record in one store
    /// open-close cycle.
    ///
    /// Bank payloads are sliced out of each row with the same bank order
    /// and sync filter the codec used to build it.
    pub fn process(
        &self,
        pool: &mut Pool,
        store: &Store,
        retention: usize,
    ) -> Result<(), FarmError> {
        store.rotate_backups(retention)?;

        let mut datafile = store.open()?;

        datafile.write(&pool.board_path(), &pool.board.status_bytes())?;
        for bank in pool.storage.iter().filter(|bank| bank.layout.persist) {
            datafile.write(&pool.pool_dataset_path(&bank.layout.path), &bank.data)?;
        }

        let group = pool.group();
        let board_dims = pool.board.dims();
        let streamed_paths: Vec<String> = pool
            .task_template
            .iter()
            .map(|schema| pool.task_dataset_path(&schema.path))
            .collect();

        let Pool {
            task_template,
            aggregate,
            tasks,
            ..
        } = pool;

        for record in self.data.chunks_exact(self.record_len) {
            let tid = LittleEndian::read_i32(&record[4..]);
            if tid == EMPTY_TID {
                continue;
            }
            let status = LittleEndian::read_i32(&record[8..]);
            let location = [
                LittleEndian::read_i32(&record[12..]) as usize,
                LittleEndian::read_i32(&record[16..]) as usize,
            ];

            let mut position = HEADER_BYTES;
            for (index, schema) in task_template.iter().enumerate() {
                if !schema.sync {
                    continue;
                }
                let payload = &record[position..position + schema.byte_size];
                position += schema.byte_size;

                if schema.policy.is_streamed() {
                    let offset =
                        layout::slab_offset(schema.policy, schema.dims, board_dims, tid, location);

                    if schema.persist {
                        datafile.write_slab(&streamed_paths[index], offset, schema.dims, payload)?;
                    }
                    if let Some(bank) = aggregate[index].as_mut() {
                        copy_into_aggregate(bank, offset, schema.dims, payload);
                    }
                } else {
                    let task = &mut tasks[tid as usize];
                    task.storage[index].data.copy_from_slice(payload);
                    task.status = TaskStatus::from_i32(status).unwrap_or(TaskStatus::Finished);
                    task.cid = self.cid;

                    if schema.persist {
                        let path =
                            format!("{group}/tasks/task-{tid:04}/{}", schema.path);
                        datafile.write(&path, payload)?;
                    }
                }
            }
        }

        datafile.close()?;

        info!(
            cid = self.cid,
            records = self.counter,
            "Committed checkpoint window"
        );

        Ok(())
    }
}

/// Place one task's bank at its slab offset inside the coordinator-side
/// whole-run buffer.
fn copy_into_aggregate(
    bank: &mut Bank,
    offset: [usize; MAX_RANK],
    dims: [usize; MAX_RANK],
    bytes: &[u8],
) {
    debug_assert!(bank.layout.policy != MappingPolicy::Group);

    let esize = bank.layout.dtype.size();
    let cols = bank.layout.dims[1];

    for row in 0..dims[0] {
        let src = row * dims[1] * esize;
        let dst = ((offset[0] + row) * cols + offset[1]) * esize;
        bank.data[dst..dst + dims[1] * esize].copy_from_slice(&bytes[src..src + dims[1] * esize]);
    }
}
