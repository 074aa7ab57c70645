//! Recovery from a previous run's datafile.
//!
//! The "last" pointer names the most recent pool; every pool up to it is
//! reopened, its board and banks read back, and the sync pool banks
//! re-broadcast so workers hold the same state they would after a normal
//! pool preparation. Cells that were in flight when the run died are
//! demoted back to empty and get dispatched again.

use crate::{
    comm::{CoordinatorPort, Role, WorkerPort},
    config::FarmConfig,
    datafile::Store,
    layout::MappingPolicy,
    module::{FarmModule, InitSpec},
    pool::{self, Pool, TaskStatus},
    FarmError,
};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info};

/// Rebuild every pool of a previous run on the coordinator.
pub fn recover_coordinator(
    module: &dyn FarmModule,
    init: &InitSpec,
    config: &FarmConfig,
    store: &Store,
    port: &dyn CoordinatorPort,
) -> Result<Vec<Pool>, FarmError> {
    let mut datafile = store.open()?;
    let last = datafile.attr("last", "id")?;

    // workers need the pool count before they can mirror the rebuild
    let mut frame = [0u8; 4];
    LittleEndian::write_i32(&mut frame, last);
    port.broadcast(frame.to_vec())?;

    let mut pools = Vec::new();
    for pid in 0..=last as usize {
        let mut pool = Pool::open(pid, module, init, config, Role::Coordinator)?;

        let board_bytes = datafile.read(&pool.board_path())?;
        pool.board.load_status_bytes(&board_bytes)?;
        pool.board.demote_in_use();
        pool.completed = pool.board.finished();

        for bank in pool.storage.iter_mut().filter(|bank| bank.layout.persist) {
            let path = format!("pools/pool-{pid:04}/{}", bank.layout.path);
            let bytes = datafile.read(&path)?;
            if bytes.len() != bank.layout.byte_size {
                return Err(FarmError::Frame {
                    expected: bank.layout.byte_size,
                    got: bytes.len(),
                });
            }
            bank.data = bytes;
        }

        recover_task_banks(&mut pool, &mut datafile)?;

        for bank in pool.storage.iter().filter(|bank| bank.layout.sync) {
            port.broadcast(bank.data.clone())?;
        }

        debug!(
            pid = pid,
            completed = pool.completed,
            pool_size = pool.pool_size,
            "Recovered pool"
        );

        pools.push(pool);
    }

    datafile.close()?;

    info!(last = last, "Recovered run state from the datafile");

    Ok(pools)
}

/// Read persisted task-level data back into the coordinator's aggregate
/// buffers and materialized tasks.
fn recover_task_banks(
    pool: &mut Pool,
    datafile: &mut crate::datafile::Datafile,
) -> Result<(), FarmError> {
    for index in 0..pool.task_template.len() {
        let schema = pool.task_template[index].clone();
        if !schema.persist {
            continue;
        }

        if schema.policy.is_streamed() {
            let bytes = datafile.read(&pool.task_dataset_path(&schema.path))?;
            if let Some(bank) = pool.aggregate[index].as_mut() {
                if bytes.len() != bank.layout.byte_size {
                    return Err(FarmError::Frame {
                        expected: bank.layout.byte_size,
                        got: bytes.len(),
                    });
                }
                bank.data = bytes;
            }
        } else if schema.policy == MappingPolicy::Basic {
            for tid in 0..pool.pool_size as i32 {
                let location = pool.board.location_of(tid);
                if pool.board.cell(location).status != TaskStatus::Finished {
                    continue;
                }

                let path = pool.basic_dataset_path(tid, &schema.path);
                let bytes = datafile.read(&path)?;
                let task = &mut pool.tasks[tid as usize];
                if bytes.len() != task.storage[index].layout.byte_size {
                    return Err(FarmError::Frame {
                        expected: task.storage[index].layout.byte_size,
                        got: bytes.len(),
                    });
                }
                task.storage[index].data = bytes;
                task.status = TaskStatus::Finished;
            }
        }
    }

    Ok(())
}

/// Worker-side mirror of [`recover_coordinator`]: open the same pools
/// and receive each pool's sync banks.
pub fn recover_worker(
    module: &dyn FarmModule,
    init: &InitSpec,
    config: &FarmConfig,
    port: &dyn WorkerPort,
) -> Result<Vec<Pool>, FarmError> {
    let frame = port.recv()?;
    if frame.len() != 4 {
        return Err(FarmError::Frame {
            expected: 4,
            got: frame.len(),
        });
    }
    let last = LittleEndian::read_i32(&frame);

    let mut pools = Vec::new();
    for pid in 0..=last as usize {
        let mut pool = Pool::open(pid, module, init, config, Role::Worker)?;
        pool::pool_prepare_worker(&mut pool, port)?;
        pools.push(pool);
    }

    Ok(pools)
}
