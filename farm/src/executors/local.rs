use crate::{
    comm::{channel, WorkerPort},
    config::{ConfigErrors, FarmConfig},
    dispatch, module,
    signal::Flag,
    FarmError,
};
use rayon::ThreadPoolBuilder;
use tracing::{debug, error, instrument};

/// Executor that runs the coordinator and all workers on a local thread
/// pool, wired together with the in-process channel fabric.
#[derive(Debug)]
pub struct LocalExecutor {
    config: FarmConfig,
}

impl LocalExecutor {
    pub fn load(config: FarmConfig) -> Result<Self, ConfigErrors> {
        Ok(Self { config })
    }

    #[instrument(skip(self, flag), level = "info")]
    pub fn execute(&mut self, flag: Flag, resume: bool) -> Result<(), FarmError> {
        let workers = self
            .config
            .executor
            .workers
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1))
            .max(1);

        debug!("Starting local fabric with {workers} worker threads");

        let store = self.config.datafile.build(&self.config.name);
        let (coordinator_port, worker_ports) = channel::fabric(workers);

        // one thread per worker plus one for the coordinator; everything
        // blocks on channel receives, so nothing may share a thread
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers + 1)
            .build()
            .map_err(|error| FarmError::Executor {
                reason: error.to_string(),
            })?;

        let config = &self.config;
        pool.scope(move |scope| {
            for port in worker_ports {
                scope.spawn(move |_| {
                    let mut module = match module::load(&config.module.name) {
                        Ok(module) => module,
                        Err(error) => {
                            error!(worker = port.id(), error = ?error, "Worker failed to load the module: {error}");

                            return;
                        }
                    };

                    if let Err(error) = dispatch::run_worker(module.as_mut(), config, &port, resume)
                    {
                        error!(worker = port.id(), error = ?error, "Worker aborted: {error}");
                    }
                });
            }

            let mut module = module::load(&config.module.name)?;
            let result = dispatch::run_coordinator(
                module.as_mut(),
                config,
                &store,
                &coordinator_port,
                &flag,
                resume,
            );

            // a dropped port disconnects any worker still blocked on a
            // receive after a coordinator abort
            drop(coordinator_port);

            result
        })
    }
}
