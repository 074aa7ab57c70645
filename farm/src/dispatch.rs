//! The coordinator/worker dispatch engine.
//!
//! One message in flight per worker: the coordinator seeds every worker
//! with a task, then answers each incoming result with the next free
//! board cell until the board is exhausted. Results are staged into the
//! checkpoint window as received; the window flushes when full and on
//! interrupt, so at most one window of results is ever lost.

use crate::{
    checkpoint::Checkpoint,
    codec::{pack_task, payload_len, Message, Tag},
    comm::{CoordinatorPort, Role, WorkerPort},
    config::FarmConfig,
    datafile::Store,
    layout,
    module::{FarmModule, InitSpec, PoolVerdict, TaskVerdict},
    pool::{self, Pool, Task, TaskStatus},
    restart,
    signal::{self, Flag},
    FarmError,
};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, warn};

/// Dispatch one pool on the coordinator side.
pub fn coordinator_loop(
    pool: &mut Pool,
    module: &dyn FarmModule,
    port: &dyn CoordinatorPort,
    store: &Store,
    config: &FarmConfig,
    flag: &Flag,
) -> Result<(), FarmError> {
    let workers = port.workers();
    let mut checkpoint = Checkpoint::open(pool, workers, config.checkpoint.target);
    let mut scratch = Task::open(pool, 0)?;
    let mut terminated = vec![false; workers];
    // a dispatched Data frame the worker has not yet answered
    let mut in_flight = vec![false; workers];

    for worker in 0..workers {
        if dispatch_next(pool, port, &mut scratch, worker, checkpoint.cid)? {
            in_flight[worker] = true;
        } else {
            port.send(worker, Message::Terminate.encode())?;
            terminated[worker] = true;
        }
    }

    while terminated.iter().any(|&done| !done) {
        if flag.is_raised() || signal::iced(&config.name) {
            return interrupt(
                pool,
                module,
                port,
                store,
                config,
                &mut checkpoint,
                &mut in_flight,
                &terminated,
            );
        }

        if checkpoint.is_full() {
            flush(&mut checkpoint, pool, module, store, config)?;
        }

        let (worker, bytes) = port.recv_any()?;
        match Message::decode(&bytes)? {
            Message::Result(frame) => {
                let expected = payload_len(&pool.task_template);
                if frame.payload.len() != expected {
                    return Err(FarmError::Frame {
                        expected,
                        got: frame.payload.len(),
                    });
                }

                pool.board
                    .mark(frame.location, frame.status, worker as i32, checkpoint.cid);
                pool.completed += 1;
                checkpoint.stage(&bytes)?;

                if dispatch_next(pool, port, &mut scratch, worker, checkpoint.cid)? {
                    in_flight[worker] = true;
                } else {
                    debug!(worker = worker, "Board exhausted, terminating worker");
                    port.send(worker, Message::Terminate.encode())?;
                    terminated[worker] = true;
                    in_flight[worker] = false;
                }
            }
            Message::CheckpointEcho(frame) => {
                // a mid-task snapshot: persist it, then hand the very
                // same task straight back
                pool.board
                    .mark(frame.location, TaskStatus::InUse, worker as i32, checkpoint.cid);
                checkpoint.stage(&bytes)?;
                port.send(worker, Message::Data(frame).encode())?;
            }
            message => {
                return Err(FarmError::Protocol {
                    tag: message.tag() as i32,
                })
            }
        }
    }

    if !checkpoint.is_empty() {
        flush(&mut checkpoint, pool, module, store, config)?;
    }

    info!(
        pid = pool.pid,
        completed = pool.completed,
        "Pool fully dispatched"
    );

    Ok(())
}

/// Wind the pool down after an interrupt: drain every answer still in
/// flight so finished work is not lost, flush the window, terminate the
/// workers, and surface the interrupt.
fn interrupt(
    pool: &mut Pool,
    module: &dyn FarmModule,
    port: &dyn CoordinatorPort,
    store: &Store,
    config: &FarmConfig,
    checkpoint: &mut Checkpoint,
    in_flight: &mut [bool],
    terminated: &[bool],
) -> Result<(), FarmError> {
    warn!(pid = pool.pid, "Interrupt observed, draining in-flight tasks");

    while in_flight.iter().any(|&pending| pending) {
        if checkpoint.is_full() {
            flush(checkpoint, pool, module, store, config)?;
        }

        let (worker, bytes) = port.recv_any()?;
        match Message::decode(&bytes)? {
            Message::Result(frame) => {
                pool.board
                    .mark(frame.location, frame.status, worker as i32, checkpoint.cid);
                pool.completed += 1;
                checkpoint.stage(&bytes)?;
                in_flight[worker] = false;
            }
            Message::CheckpointEcho(frame) => {
                // keep the snapshot but do not hand the task back; the
                // cell stays in-use and is re-dispatched after a restart
                pool.board
                    .mark(frame.location, TaskStatus::InUse, worker as i32, checkpoint.cid);
                checkpoint.stage(&bytes)?;
                in_flight[worker] = false;
            }
            message => {
                return Err(FarmError::Protocol {
                    tag: message.tag() as i32,
                })
            }
        }
    }

    if !checkpoint.is_empty() {
        flush(checkpoint, pool, module, store, config)?;
    }

    for (worker, done) in terminated.iter().enumerate() {
        if !*done {
            port.send(worker, Message::Terminate.encode())?;
        }
    }

    Err(FarmError::Interrupted)
}

/// Hand the next free board cell to `worker`, or report the board
/// exhausted.
fn dispatch_next(
    pool: &mut Pool,
    port: &dyn CoordinatorPort,
    scratch: &mut Task,
    worker: usize,
    cid: i32,
) -> Result<bool, FarmError> {
    let Some((tid, location)) = pool.board.next_task() else {
        return Ok(false);
    };

    scratch.assign(tid, location);
    port.send(worker, pack_task(scratch, Tag::Data).encode())?;
    pool.board.mark(location, TaskStatus::InUse, worker as i32, cid);

    Ok(true)
}

fn flush(
    checkpoint: &mut Checkpoint,
    pool: &mut Pool,
    module: &dyn FarmModule,
    store: &Store,
    config: &FarmConfig,
) -> Result<(), FarmError> {
    module.checkpoint_prepare(pool, checkpoint)?;
    checkpoint.process(pool, store, config.checkpoint.files)?;

    let next = checkpoint.cid + 1;
    checkpoint.reset(next);

    Ok(())
}

/// Process one pool on the worker side until the coordinator terminates
/// this worker.
pub fn worker_loop(
    pool: &Pool,
    module: &dyn FarmModule,
    port: &dyn WorkerPort,
) -> Result<(), FarmError> {
    let mut task = Task::open(pool, 0)?;

    loop {
        let bytes = port.recv()?;
        match Message::decode(&bytes)? {
            Message::Terminate => break,
            Message::Data(frame) => {
                crate::codec::unpack_frame(&frame, &mut task)?;
                task.status = TaskStatus::InUse;

                module.task_prepare(pool, &mut task)?;
                let verdict = module.task_process(pool, &mut task)?;
                task.status = TaskStatus::Finished;

                port.send(pack_task(&task, Tag::Result).encode())?;

                if verdict == TaskVerdict::Finalize {
                    task.finalize();
                    task = Task::open(pool, 0)?;
                }
            }
            message => {
                return Err(FarmError::Protocol {
                    tag: message.tag() as i32,
                })
            }
        }
    }

    Ok(())
}

/// The whole coordinator lifetime: open pools generation by generation,
/// dispatch each one and decide with the module whether to continue.
pub fn run_coordinator(
    module: &mut dyn FarmModule,
    config: &FarmConfig,
    store: &Store,
    port: &dyn CoordinatorPort,
    flag: &Flag,
    resume: bool,
) -> Result<(), FarmError> {
    let mut init = InitSpec::default();
    module.init(&mut init)?;

    if port.workers() < init.min_workers {
        return Err(FarmError::NotEnoughWorkers {
            required: init.min_workers,
            available: port.workers(),
        });
    }

    let mut pools: Vec<Pool> = Vec::new();
    let mut skip_prepare = false;

    if resume {
        pools = restart::recover_coordinator(&*module, &init, config, store, port)?;
        skip_prepare = true;
    }

    let mut pid = pools.len().saturating_sub(1);

    loop {
        if pid == pools.len() {
            let pool = Pool::open(pid, &*module, &init, config, Role::Coordinator)?;

            let mut datafile = store.open()?;
            layout::commit_storage_layout(&mut datafile, &pool, &*module)?;
            datafile.close()?;

            pools.push(pool);
        }

        let (prior, rest) = pools.split_at_mut(pid);
        let pool = &mut rest[0];

        if skip_prepare {
            skip_prepare = false;
        } else {
            pool::pool_prepare_coordinator(&*module, prior, pool, store, port)?;
        }

        if let Err(error) = coordinator_loop(pool, &*module, port, store, config, flag) {
            if matches!(error, FarmError::Interrupted) {
                // workers already got Terminate; release them from the
                // verdict barrier so they exit cleanly
                let mut frame = [0u8; 4];
                LittleEndian::write_i32(&mut frame, PoolVerdict::Finalize.tag());
                let _ = port.broadcast(frame.to_vec());
            }

            return Err(error);
        }

        let cap_reached = pid + 1 >= init.pools;
        let verdict = pool::pool_process_coordinator(&*module, prior, pool, port, cap_reached)?;
        pool.finalize();

        match verdict {
            PoolVerdict::Finalize => break,
            PoolVerdict::CreateNextPool => pid += 1,
        }
    }

    info!(pools = pid + 1, "Sweep finished");

    Ok(())
}

/// The whole worker lifetime, mirroring [`run_coordinator`] step for
/// step; every broadcast the coordinator makes has a matching receive
/// here.
pub fn run_worker(
    module: &mut dyn FarmModule,
    config: &FarmConfig,
    port: &dyn WorkerPort,
    resume: bool,
) -> Result<(), FarmError> {
    let mut init = InitSpec::default();
    module.init(&mut init)?;

    let mut pools: Vec<Pool> = Vec::new();
    let mut skip_prepare = false;

    if resume {
        pools = restart::recover_worker(&*module, &init, config, port)?;
        skip_prepare = true;
    }

    let mut pid = pools.len().saturating_sub(1);

    loop {
        if pid == pools.len() {
            pools.push(Pool::open(pid, &*module, &init, config, Role::Worker)?);
        }
        let pool = &mut pools[pid];

        if skip_prepare {
            skip_prepare = false;
        } else {
            pool::pool_prepare_worker(pool, port)?;
        }

        worker_loop(pool, &*module, port)?;

        match pool::pool_process_worker(port)? {
            PoolVerdict::Finalize => break,
            PoolVerdict::CreateNextPool => pid += 1,
        }
    }

    Ok(())
}
