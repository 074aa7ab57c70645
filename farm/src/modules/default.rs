//! The smallest useful module: one pool, one streamed result bank
//! holding the cell coordinates. Doubles as a quick end-to-end sanity
//! run for a fresh setup.

use crate::{
    layout::{DataType, MappingPolicy, Schema},
    module::{FarmModule, HookError, TaskVerdict},
    pool::{Pool, Task},
};

pub struct DefaultModule;

impl FarmModule for DefaultModule {
    fn storage(&self, pool: &mut Pool) -> Result<(), HookError> {
        pool.add_task_bank(Schema::persisted(
            "result",
            [1, 3],
            DataType::F64,
            MappingPolicy::Pm3d,
        ));

        Ok(())
    }

    fn task_process(&self, _pool: &Pool, task: &mut Task) -> Result<TaskVerdict, HookError> {
        let mut result = task.storage[0].grid_mut::<f64>();
        result.set(0, 0, task.location[0] as f64);
        result.set(0, 1, task.location[1] as f64);
        result.set(0, 2, f64::from(task.tid));

        Ok(TaskVerdict::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        comm::Role,
        config::FarmConfig,
        module::InitSpec,
    };

    #[test]
    fn writes_cell_coordinates() {
        let config = FarmConfig::new("default", 3, 2);
        let pool = Pool::open(0, &DefaultModule, &InitSpec::default(), &config, Role::Worker)
            .unwrap();

        let mut task = Task::open(&pool, 4).unwrap();
        DefaultModule.task_process(&pool, &mut task).unwrap();

        let result = task.storage[0].grid::<f64>();
        assert_eq!(result.get(0, 0), 1.0);
        assert_eq!(result.get(0, 1), 1.0);
        assert_eq!(result.get(0, 2), 4.0);
    }
}
