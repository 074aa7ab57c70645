use super::{window_size, Checkpoint};
use crate::{
    codec::{pack_task, Tag},
    comm::Role,
    config::FarmConfig,
    datafile::{MemoryStore, Store},
    layout::{self, DataType, MappingPolicy, Schema},
    module::{FarmModule, HookError, InitSpec},
    pool::{Pool, Task, TaskStatus},
    FarmError,
};

struct ListAndBasicModule;

impl FarmModule for ListAndBasicModule {
    fn storage(&self, pool: &mut Pool) -> Result<(), HookError> {
        pool.add_task_bank(Schema::persisted(
            "result",
            [1, 2],
            DataType::F64,
            MappingPolicy::List,
        ));
        pool.add_task_bank(Schema::persisted(
            "note",
            [1, 1],
            DataType::I32,
            MappingPolicy::Basic,
        ));

        Ok(())
    }
}

fn finished_task(pool: &Pool, tid: i32) -> Task {
    let mut task = Task::open(pool, tid).unwrap();
    task.status = TaskStatus::Finished;

    task.storage[0]
        .grid_mut::<f64>()
        .set(0, 0, f64::from(tid) * 2.0);
    task.storage[0]
        .grid_mut::<f64>()
        .set(0, 1, f64::from(tid) * 2.0 + 1.0);
    task.storage[1].grid_mut::<i32>().set(0, 0, 100 + tid);

    task
}

#[test]
pub fn window_size_is_a_worker_multiple() {
    assert_eq!(window_size(10, 4), 8);
    assert_eq!(window_size(4, 4), 4);
    assert_eq!(window_size(3, 4), 4);
    assert_eq!(window_size(0, 3), 3);
}

#[test]
pub fn stage_rejects_overflow_and_bad_length() {
    let config = FarmConfig::new("window", 2, 2);
    let pool = Pool::open(0, &ListAndBasicModule, &InitSpec::default(), &config, Role::Coordinator)
        .unwrap();
    let mut checkpoint = Checkpoint::open(&pool, 1, 2);

    let frame = pack_task(&finished_task(&pool, 0), Tag::Result).encode();
    checkpoint.stage(&frame).unwrap();
    assert!(matches!(
        checkpoint.stage(&frame[..frame.len() - 1]),
        Err(FarmError::Frame { .. })
    ));

    checkpoint.stage(&frame).unwrap();
    assert!(checkpoint.is_full());
    assert!(matches!(
        checkpoint.stage(&frame),
        Err(FarmError::WindowOverflow)
    ));

    checkpoint.reset(1);
    assert_eq!(checkpoint.cid, 1);
    assert!(checkpoint.is_empty());
    checkpoint.stage(&frame).unwrap();
}

#[test]
pub fn process_commits_streamed_and_basic_banks() {
    let config = FarmConfig::new("commit", 2, 2);
    let mut pool =
        Pool::open(0, &ListAndBasicModule, &InitSpec::default(), &config, Role::Coordinator)
            .unwrap();
    let store = Store::Memory(MemoryStore::new());

    let mut datafile = store.open().unwrap();
    layout::commit_storage_layout(&mut datafile, &pool, &ListAndBasicModule).unwrap();
    datafile.close().unwrap();

    let mut checkpoint = Checkpoint::open(&pool, 2, 4);
    for tid in [1i32, 2] {
        let task = finished_task(&pool, tid);
        pool.board
            .mark(task.location, TaskStatus::Finished, 0, checkpoint.cid);
        checkpoint.stage(&pack_task(&task, Tag::Result).encode()).unwrap();
    }

    checkpoint.process(&mut pool, &store, 2).unwrap();

    let mut datafile = store.open().unwrap();

    // streamed list dataset is [pool_size * 1, 2] with rows at tid offsets
    let bytes = datafile.read("pools/pool-0000/tasks/result").unwrap();
    let cell = |r: usize, c: usize| {
        let at = (r * 2 + c) * 8;
        f64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
    };
    assert_eq!(cell(1, 0), 2.0);
    assert_eq!(cell(1, 1), 3.0);
    assert_eq!(cell(2, 0), 4.0);
    assert_eq!(cell(0, 0), 0.0);

    // basic banks land in one dataset per task
    let note = datafile.read("pools/pool-0000/tasks/task-0002/note").unwrap();
    assert_eq!(i32::from_le_bytes(note[0..4].try_into().unwrap()), 102);

    // the board snapshot went out with the same flush
    let board = datafile.read("pools/pool-0000/board").unwrap();
    assert_eq!(board.len(), 4 * 4);

    datafile.close().unwrap();

    // coordinator-side aggregation mirrors the persisted dataset
    let aggregate = pool.aggregate[0].as_ref().unwrap();
    assert_eq!(aggregate.grid::<f64>().get(2, 1), 5.0);

    // materialized tasks absorbed the staged basic bank
    assert_eq!(pool.tasks[1].status, TaskStatus::Finished);
    assert_eq!(pool.tasks[1].storage[1].grid::<i32>().get(0, 0), 101);
}
