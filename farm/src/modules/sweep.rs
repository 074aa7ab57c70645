//! A multi-generation sweep: each pool derives its origin from the
//! previous one, workers offset it by their cell coordinates. Shows the
//! pool-bank broadcast and the prior-pool chain in one place.

use crate::{
    layout::{DataType, MappingPolicy, Schema},
    module::{FarmModule, HookError, InitSpec, PoolVerdict, TaskVerdict},
    pool::{Pool, Task},
};

pub struct SweepModule {
    pub pools: usize,
}

impl Default for SweepModule {
    fn default() -> Self {
        Self { pools: 4 }
    }
}

impl FarmModule for SweepModule {
    fn init(&mut self, spec: &mut InitSpec) -> Result<(), HookError> {
        spec.pools = self.pools;

        Ok(())
    }

    fn storage(&self, pool: &mut Pool) -> Result<(), HookError> {
        pool.add_pool_bank(Schema::persisted(
            "seed",
            [1, 2],
            DataType::F64,
            MappingPolicy::Group,
        ));
        pool.add_task_bank(Schema::persisted(
            "samples",
            [1, 2],
            DataType::F64,
            MappingPolicy::List,
        ));

        Ok(())
    }

    fn pool_prepare(&self, prior: &[Pool], current: &mut Pool) -> Result<(), HookError> {
        let origin = prior
            .last()
            .map(|pool| pool.storage[0].grid::<f64>().get(0, 0) + 1.0)
            .unwrap_or(0.0);

        let mut seed = current.storage[0].grid_mut::<f64>();
        seed.set(0, 0, origin);
        seed.set(0, 1, current.pid as f64);

        Ok(())
    }

    fn task_process(&self, pool: &Pool, task: &mut Task) -> Result<TaskVerdict, HookError> {
        // pool banks arrive on workers via the pool-prepare broadcast
        let seed = pool.storage[0].grid::<f64>();

        let mut samples = task.storage[0].grid_mut::<f64>();
        samples.set(0, 0, seed.get(0, 0) + task.location[0] as f64);
        samples.set(0, 1, seed.get(0, 1) + task.location[1] as f64);

        Ok(TaskVerdict::Done)
    }

    fn pool_process(&self, _prior: &[Pool], current: &Pool) -> Result<PoolVerdict, HookError> {
        if current.pid + 1 < self.pools {
            Ok(PoolVerdict::CreateNextPool)
        } else {
            Ok(PoolVerdict::Finalize)
        }
    }
}
