//! The in-memory task board: one record per grid cell, owned exclusively
//! by the coordinator.

use crate::{FarmError, MAX_RANK};
use itertools::iproduct;
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Lifecycle state of one task/board cell.
#[derive(Serialize_repr, Deserialize_repr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TaskStatus {
    Empty = 0,
    InUse = 1,
    Finished = 2,
}

impl TaskStatus {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(TaskStatus::Empty),
            1 => Some(TaskStatus::InUse),
            2 => Some(TaskStatus::Finished),
            _ => None,
        }
    }
}

/// Per-cell record: status plus coordinator-side stats.
#[derive(Debug, Clone, Copy)]
pub struct Cell {
    pub status: TaskStatus,
    pub worker: i32,
    pub cid: i32,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            status: TaskStatus::Empty,
            worker: -1,
            cid: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Board {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Board {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::default(); width * height],
        }
    }

    pub fn dims(&self) -> [usize; MAX_RANK] {
        [self.width, self.height]
    }

    pub fn cell(&self, location: [usize; MAX_RANK]) -> &Cell {
        &self.cells[location[1] * self.width + location[0]]
    }

    pub fn mark(&mut self, location: [usize; MAX_RANK], status: TaskStatus, worker: i32, cid: i32) {
        let cell = &mut self.cells[location[1] * self.width + location[0]];
        cell.status = status;
        cell.worker = worker;
        cell.cid = cid;
    }

    /// First `Empty` cell in the fixed row-major scan order, as
    /// `(tid, location)` with `tid = y * width + x`.
    pub fn next_task(&self) -> Option<(i32, [usize; MAX_RANK])> {
        iproduct!(0..self.height, 0..self.width)
            .find(|&(y, x)| self.cell([x, y]).status == TaskStatus::Empty)
            .map(|(y, x)| ((y * self.width + x) as i32, [x, y]))
    }

    /// Board coordinates for a task id under the fixed scan order.
    pub fn location_of(&self, tid: i32) -> [usize; MAX_RANK] {
        let tid = tid as usize;
        [tid % self.width, tid / self.width]
    }

    pub fn finished(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.status == TaskStatus::Finished)
            .count()
    }

    pub fn all_finished(&self) -> bool {
        self.finished() == self.cells.len()
    }

    /// Persisted form: rank-2 `[width, height]` dataset of cell statuses,
    /// little-endian i32, row index x and column index y.
    pub fn status_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.cells.len() * 4);

        for x in 0..self.width {
            for y in 0..self.height {
                bytes.extend_from_slice(&(self.cell([x, y]).status as i32).to_le_bytes());
            }
        }

        bytes
    }

    pub fn load_status_bytes(&mut self, bytes: &[u8]) -> Result<(), FarmError> {
        if bytes.len() != self.cells.len() * 4 {
            return Err(FarmError::Frame {
                expected: self.cells.len() * 4,
                got: bytes.len(),
            });
        }

        for x in 0..self.width {
            for y in 0..self.height {
                let at = (x * self.height + y) * 4;
                let raw = i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
                let status = TaskStatus::from_i32(raw).ok_or(FarmError::Protocol { tag: raw })?;
                self.mark([x, y], status, -1, 0);
            }
        }

        Ok(())
    }

    /// Demote `InUse` cells back to `Empty` so interrupted work is
    /// dispatched again after a restart.
    pub fn demote_in_use(&mut self) {
        for cell in self.cells.iter_mut() {
            if cell.status == TaskStatus::InUse {
                cell.status = TaskStatus::Empty;
                cell.worker = -1;
            }
        }
    }
}
