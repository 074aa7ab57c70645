//! The pool/task data model: one pool per sweep generation, one task per
//! board cell, storage banks sized by the layout engine.

pub mod board;

pub use board::{Board, Cell, TaskStatus};

use crate::{
    comm::{CoordinatorPort, Role, WorkerPort},
    config::FarmConfig,
    datafile::Store,
    layout::{self, Bank, DataType, MappingPolicy, Schema},
    module::{FarmModule, InitSpec, PoolVerdict},
    FarmError, MAX_RANK,
};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, warn};

/// One generation of the sweep.
///
/// Schemas are fixed by the layout engine at open time and must not change
/// afterwards; the codec and the checkpoint engine both rely on the
/// declared bank order and sync flags staying put.
#[derive(Debug)]
pub struct Pool {
    pub pid: usize,
    pub name: String,
    pub role: Role,
    pub board_layout: Schema,
    pub board: Board,
    /// pool-level banks, always `Group`-mapped
    pub storage: Vec<Bank>,
    /// bank schemas shared by every task of this pool
    pub task_template: Vec<Schema>,
    /// coordinator-side whole-run buffers for streamed task banks,
    /// parallel to `task_template`
    pub aggregate: Vec<Option<Bank>>,
    /// materialized per-cell tasks, populated when any `Basic` bank exists
    pub tasks: Vec<Task>,
    pub pool_size: usize,
    pub completed: usize,
}

impl Pool {
    /// Open a pool: apply the module's storage overlay, validate and fix
    /// the layout, and commit the memory layout.
    ///
    /// Runs identically on every process; only the coordinator also
    /// allocates the aggregation buffers and materialized tasks.
    pub fn open(
        pid: usize,
        module: &dyn FarmModule,
        init: &InitSpec,
        config: &FarmConfig,
        role: Role,
    ) -> Result<Self, FarmError> {
        let width = config.board.width;
        let height = config.board.height;

        let mut pool = Pool {
            pid,
            name: format!("pool-{pid:04}"),
            role,
            board_layout: Schema::persisted(
                "board",
                [width, height],
                DataType::I32,
                MappingPolicy::Group,
            ),
            board: Board::new(width, height),
            storage: Vec::new(),
            task_template: Vec::new(),
            aggregate: Vec::new(),
            tasks: Vec::new(),
            pool_size: width * height,
            completed: 0,
        };

        module.storage(&mut pool)?;

        if pool.storage.len() > init.banks_per_pool {
            return Err(layout::StorageError::TooManyBanks {
                declared: pool.storage.len(),
                limit: init.banks_per_pool,
            }
            .into());
        }
        if pool.task_template.len() > init.banks_per_task {
            return Err(layout::StorageError::TooManyBanks {
                declared: pool.task_template.len(),
                limit: init.banks_per_task,
            }
            .into());
        }

        // There is no support for other storage types of pool datasets
        for bank in pool.storage.iter_mut() {
            if bank.layout.policy != MappingPolicy::Group {
                warn!(
                    path = %bank.layout.path,
                    "Pool-level banks must use the group policy. Fixing"
                );
                bank.layout.policy = MappingPolicy::Group;
            }
        }
        // Task-level group banks are dataset-per-task, same as basic
        for schema in pool.task_template.iter_mut() {
            if schema.policy == MappingPolicy::Group {
                warn!(
                    path = %schema.path,
                    "Task-level banks cannot use the group policy, treating as basic"
                );
                schema.policy = MappingPolicy::Basic;
            }
        }

        layout::check_schema(&mut pool.board_layout)?;
        layout::check_layout(pool.storage.iter_mut().map(|bank| &mut bank.layout))?;
        layout::check_layout(pool.task_template.iter_mut())?;

        layout::commit_memory_layout(&mut pool.storage)?;

        if role == Role::Coordinator {
            pool.commit_aggregation_layout()?;
        }

        debug!(
            pid = pool.pid,
            pool_banks = pool.storage.len(),
            task_banks = pool.task_template.len(),
            pool_size = pool.pool_size,
            "Opened pool"
        );

        Ok(pool)
    }

    /// Whole-dataset buffers for streamed banks plus materialized tasks
    /// for `Basic` banks, coordinator only.
    fn commit_aggregation_layout(&mut self) -> Result<(), FarmError> {
        let board_dims = self.board.dims();

        for schema in self.task_template.iter() {
            if schema.policy.is_streamed() && schema.sync {
                let mut whole = schema.clone();
                whole.dims = layout::dataset_dims(schema.policy, schema.dims, board_dims);
                whole.persist = false;
                layout::check_schema(&mut whole)?;

                let mut bank = Bank::new(whole);
                bank.allocate()?;
                self.aggregate.push(Some(bank));
            } else {
                self.aggregate.push(None);
            }
        }

        if self
            .task_template
            .iter()
            .any(|schema| schema.policy == MappingPolicy::Basic)
        {
            let tasks = (0..self.pool_size)
                .map(|tid| Task::open(self, tid as i32))
                .collect::<Result<Vec<_>, _>>()?;
            self.tasks = tasks;
        }

        Ok(())
    }

    /// module-facing: declare one pool-level bank
    pub fn add_pool_bank(&mut self, schema: Schema) {
        self.storage.push(Bank::new(schema));
    }

    /// module-facing: declare one task-level bank
    pub fn add_task_bank(&mut self, schema: Schema) {
        self.task_template.push(schema);
    }

    /// the pool's group in the dataset store
    pub fn group(&self) -> String {
        format!("pools/{}", self.name)
    }

    pub fn board_path(&self) -> String {
        format!("{}/board", self.group())
    }

    pub fn pool_dataset_path(&self, leaf: &str) -> String {
        format!("{}/{leaf}", self.group())
    }

    pub fn task_dataset_path(&self, leaf: &str) -> String {
        format!("{}/tasks/{leaf}", self.group())
    }

    pub fn basic_dataset_path(&self, tid: i32, leaf: &str) -> String {
        format!("{}/tasks/task-{tid:04}/{leaf}", self.group())
    }

    /// Release task-level buffers once the pool is fully computed. The
    /// pool-level banks stay available to later generations.
    pub fn finalize(&mut self) {
        for task in self.tasks.iter_mut() {
            task.finalize();
        }
    }
}

/// One grid-cell computation.
#[derive(Debug, Clone)]
pub struct Task {
    pub pid: usize,
    pub tid: i32,
    pub location: [usize; MAX_RANK],
    pub status: TaskStatus,
    pub worker: i32,
    pub cid: i32,
    pub storage: Vec<Bank>,
}

impl Task {
    /// Allocate a task's banks per the pool's template. Used both for
    /// live tasks and for the scratch objects rehydrated from wire data.
    pub fn open(pool: &Pool, tid: i32) -> Result<Self, FarmError> {
        let mut storage: Vec<Bank> = pool
            .task_template
            .iter()
            .map(|schema| Bank::new(schema.clone()))
            .collect();
        layout::commit_memory_layout(&mut storage)?;

        Ok(Task {
            pid: pool.pid,
            tid,
            location: pool.board.location_of(tid),
            status: TaskStatus::Empty,
            worker: -1,
            cid: 0,
            storage,
        })
    }

    /// point the scratch task at a new board cell
    pub fn assign(&mut self, tid: i32, location: [usize; MAX_RANK]) {
        self.tid = tid;
        self.location = location;
        self.status = TaskStatus::InUse;
    }

    /// Release the task's buffers; never touches pool-level resources.
    pub fn finalize(&mut self) {
        for bank in self.storage.iter_mut() {
            bank.data = Vec::new();
        }
    }
}

/// Coordinator side of pool preparation: run the prepare hook, write the
/// fresh pool-level data to the store, then broadcast every sync bank.
/// Must complete before any task is dispatched from this pool.
pub fn pool_prepare_coordinator(
    module: &dyn FarmModule,
    prior: &[Pool],
    pool: &mut Pool,
    store: &Store,
    port: &dyn CoordinatorPort,
) -> Result<(), FarmError> {
    module.pool_prepare(prior, pool)?;

    let mut datafile = store.open()?;
    for bank in pool.storage.iter().filter(|bank| bank.layout.persist) {
        datafile.write(&pool.pool_dataset_path(&bank.layout.path), &bank.data)?;
    }
    datafile.close()?;

    for bank in pool.storage.iter().filter(|bank| bank.layout.sync) {
        port.broadcast(bank.data.clone())?;
    }

    info!(pid = pool.pid, "Prepared pool");

    Ok(())
}

/// Worker side of pool preparation: receive every sync pool bank.
pub fn pool_prepare_worker(pool: &mut Pool, port: &dyn WorkerPort) -> Result<(), FarmError> {
    for bank in pool.storage.iter_mut().filter(|bank| bank.layout.sync) {
        let bytes = port.recv()?;
        if bytes.len() != bank.layout.byte_size {
            return Err(FarmError::Frame {
                expected: bank.layout.byte_size,
                got: bytes.len(),
            });
        }
        bank.data = bytes;
    }

    Ok(())
}

/// Run the pool-process hook and broadcast the verdict so every process
/// agrees on whether a new generation begins. A `CreateNextPool` verdict
/// at the generation cap is demoted to `Finalize` before the broadcast.
pub fn pool_process_coordinator(
    module: &dyn FarmModule,
    prior: &[Pool],
    pool: &Pool,
    port: &dyn CoordinatorPort,
    cap_reached: bool,
) -> Result<PoolVerdict, FarmError> {
    let mut verdict = module.pool_process(prior, pool)?;

    if verdict == PoolVerdict::CreateNextPool && cap_reached {
        warn!(
            pid = pool.pid,
            "Pool cap reached, finalizing instead of creating the next pool"
        );
        verdict = PoolVerdict::Finalize;
    }

    let mut frame = [0u8; 4];
    LittleEndian::write_i32(&mut frame, verdict.tag());
    port.broadcast(frame.to_vec())?;

    Ok(verdict)
}

/// Worker side of the pool-process decision.
pub fn pool_process_worker(port: &dyn WorkerPort) -> Result<PoolVerdict, FarmError> {
    let frame = port.recv()?;
    if frame.len() != 4 {
        return Err(FarmError::Frame {
            expected: 4,
            got: frame.len(),
        });
    }

    let tag = LittleEndian::read_i32(&frame);
    PoolVerdict::from_tag(tag).ok_or(FarmError::Protocol { tag })
}
