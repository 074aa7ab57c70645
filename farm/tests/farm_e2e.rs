//! Whole-farm runs over the in-process channel fabric: one coordinator
//! thread, real worker threads, an in-memory dataset store.

use harrow_farm::{
    checkpoint::Checkpoint,
    comm::channel::fabric,
    config::FarmConfig,
    datafile::{MemoryStore, Store},
    dispatch,
    layout::{DataType, MappingPolicy, Schema},
    module::{FarmModule, HookError, TaskVerdict},
    pool::{Pool, Task},
    signal::Flag,
    FarmError,
};
use std::sync::{Arc, Mutex};

/// One pool bank seeding the run, one list-mapped result bank holding
/// the cell coordinates shifted by the seed.
struct CoordsModule;

impl FarmModule for CoordsModule {
    fn storage(&self, pool: &mut Pool) -> Result<(), HookError> {
        pool.add_pool_bank(Schema::persisted(
            "seed",
            [1, 2],
            DataType::F64,
            MappingPolicy::Group,
        ));
        pool.add_task_bank(Schema::persisted(
            "coords",
            [1, 2],
            DataType::F64,
            MappingPolicy::List,
        ));

        Ok(())
    }

    fn pool_prepare(&self, _prior: &[Pool], current: &mut Pool) -> Result<(), HookError> {
        let mut seed = current.storage[0].grid_mut::<f64>();
        seed.set(0, 0, 0.5);
        seed.set(0, 1, 1.5);

        Ok(())
    }

    fn task_process(&self, pool: &Pool, task: &mut Task) -> Result<TaskVerdict, HookError> {
        let seed = pool.storage[0].grid::<f64>();

        let mut coords = task.storage[0].grid_mut::<f64>();
        coords.set(0, 0, seed.get(0, 0) + task.location[0] as f64);
        coords.set(0, 1, seed.get(0, 1) + task.location[1] as f64);

        Ok(TaskVerdict::Done)
    }
}

fn run_farm(
    config: &FarmConfig,
    store: &Store,
    workers: usize,
    make_module: fn() -> Box<dyn FarmModule>,
    flag: &Flag,
    resume: bool,
) -> Result<(), FarmError> {
    let (coordinator, worker_ports) = fabric(workers);

    let mut handles = Vec::new();
    for port in worker_ports {
        let config = config.clone();
        handles.push(std::thread::spawn(move || {
            let mut module = make_module();
            dispatch::run_worker(module.as_mut(), &config, &port, resume)
        }));
    }

    let mut module = make_module();
    let result = dispatch::run_coordinator(module.as_mut(), config, store, &coordinator, flag, resume);
    drop(coordinator);

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    result
}

fn coords_cell(bytes: &[u8], row: usize, col: usize) -> f64 {
    let at = (row * 2 + col) * 8;
    f64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

#[test]
fn sweep_covers_every_cell() {
    let config = FarmConfig::new("e2e", 2, 2);
    let store = Store::Memory(MemoryStore::new());

    run_farm(
        &config,
        &store,
        3,
        || Box::new(CoordsModule),
        &Flag::shared(),
        false,
    )
    .unwrap();

    let mut datafile = store.open().unwrap();
    let coords = datafile.read("pools/pool-0000/tasks/coords").unwrap();

    // tid = y * width + x; the list dataset is indexed by tid
    for (tid, location) in [[0, 0], [1, 0], [0, 1], [1, 1]].iter().enumerate() {
        assert_eq!(coords_cell(&coords, tid, 0), 0.5 + location[0] as f64);
        assert_eq!(coords_cell(&coords, tid, 1), 1.5 + location[1] as f64);
    }

    // every board cell ended up finished
    let board = datafile.read("pools/pool-0000/board").unwrap();
    for cell in board.chunks_exact(4) {
        assert_eq!(i32::from_le_bytes(cell.try_into().unwrap()), 2);
    }

    // the pool bank went out with the checkpoint
    let seed = datafile.read("pools/pool-0000/seed").unwrap();
    assert_eq!(f64::from_le_bytes(seed[0..8].try_into().unwrap()), 0.5);

    datafile.close().unwrap();
}

#[test]
fn surplus_workers_are_terminated_cleanly() {
    let config = FarmConfig::new("surplus", 2, 2);
    let store = Store::Memory(MemoryStore::new());

    // 6 workers for 4 cells; the extra ones get an immediate terminate
    run_farm(
        &config,
        &store,
        6,
        || Box::new(CoordsModule),
        &Flag::shared(),
        false,
    )
    .unwrap();

    let mut datafile = store.open().unwrap();
    let coords = datafile.read("pools/pool-0000/tasks/coords").unwrap();
    assert_eq!(coords_cell(&coords, 3, 0), 1.5);
    datafile.close().unwrap();
}

/// Records the id of every committed window.
#[derive(Clone)]
struct WindowSpy {
    cids: Arc<Mutex<Vec<(i32, usize)>>>,
}

impl FarmModule for WindowSpy {
    fn storage(&self, pool: &mut Pool) -> Result<(), HookError> {
        pool.add_task_bank(Schema::persisted(
            "result",
            [1, 1],
            DataType::I32,
            MappingPolicy::List,
        ));

        Ok(())
    }

    fn task_process(&self, _pool: &Pool, task: &mut Task) -> Result<TaskVerdict, HookError> {
        task.storage[0].grid_mut::<i32>().set(0, 0, task.tid);

        Ok(TaskVerdict::Done)
    }

    fn checkpoint_prepare(
        &self,
        _pool: &Pool,
        checkpoint: &mut Checkpoint,
    ) -> Result<(), HookError> {
        self.cids
            .lock()
            .unwrap()
            .push((checkpoint.cid, checkpoint.len()));

        Ok(())
    }
}

#[test]
fn windows_flush_in_order() {
    let mut config = FarmConfig::new("windows", 2, 2);
    config.checkpoint.target = 2;
    let store = Store::Memory(MemoryStore::new());

    let spy = WindowSpy {
        cids: Arc::new(Mutex::new(Vec::new())),
    };

    let (coordinator, worker_ports) = fabric(1);
    let worker_config = config.clone();
    let worker_spy = spy.clone();
    let port = worker_ports.into_iter().next().unwrap();
    let handle = std::thread::spawn(move || {
        let mut module = worker_spy;
        dispatch::run_worker(&mut module, &worker_config, &port, false)
    });

    let mut module = spy.clone();
    dispatch::run_coordinator(
        &mut module,
        &config,
        &store,
        &coordinator,
        &Flag::shared(),
        false,
    )
    .unwrap();
    drop(coordinator);
    handle.join().unwrap().unwrap();

    // 4 tasks through a window of 2: two full windows, ids in order
    let cids = spy.cids.lock().unwrap().clone();
    assert_eq!(cids, vec![(0, 2), (1, 2)]);
}
