mod local;

use crate::{config::ConfigErrors, config::FarmConfig, signal::Flag, FarmError};

#[derive(Debug)]
pub enum Executors {
    Local(local::LocalExecutor),
}

impl Executors {
    pub fn load(config: FarmConfig) -> Result<Self, ConfigErrors> {
        match config.executor.name.as_str() {
            "local" => Ok(Self::Local(local::LocalExecutor::load(config)?)),
            _ => Err(ConfigErrors::UnsupportedExecutor(config.executor.name)),
        }
    }

    pub fn execute(&mut self, flag: Flag, resume: bool) -> Result<(), FarmError> {
        match self {
            Self::Local(executor) => executor.execute(flag, resume),
        }
    }
}
