//! Run configuration, loaded from YAML.

use crate::{
    datafile::{MemoryStore, Store},
    module::{self, ModuleError},
};
use serde::{Deserialize, Serialize};
use std::{fs::File, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("Config was invalid")]
    Parse(#[from] serde_yaml::Error),
    #[error("Executor not supported")]
    UnsupportedExecutor(String),
    #[error("Module failed to load")]
    FailedLoadModule(#[from] ModuleError),
    #[error("Preflight checks failed")]
    PreflightFailed,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct FarmConfig {
    // Run name; prefixes the datafile and its backups, and names the
    // interrupt sentinel file
    #[serde(default = "default_name")]
    pub name: String,
    pub board: BoardConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    pub module: ModuleConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(alias = "store", default)]
    pub datafile: DatafileConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BoardConfig {
    pub width: usize,
    pub height: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CheckpointConfig {
    // target number of task records per checkpoint window; the effective
    // window size is rounded to a multiple of the worker count
    #[serde(default = "default_checkpoint_target")]
    pub target: usize,
    // number of rotated whole-file snapshots to retain
    #[serde(alias = "backups", default = "default_checkpoint_files")]
    pub files: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            target: default_checkpoint_target(),
            files: default_checkpoint_files(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    // Name of the selected module, see module::load for the selection
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    // Name of the selected executor, see Executors::load for the selection
    #[serde(default = "default_executor")]
    pub name: String,
    // worker count; defaults to the available cores minus the coordinator
    pub workers: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: default_executor(),
            workers: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, rename_all = "lowercase")]
pub enum DatafileConfig {
    Sqlite {
        #[serde(default = "default_datafile_dir")]
        dir: PathBuf,
    },
    Memory,
}

impl Default for DatafileConfig {
    fn default() -> Self {
        DatafileConfig::Sqlite {
            dir: default_datafile_dir(),
        }
    }
}

impl DatafileConfig {
    /// Build the store handle opened and closed around each flush.
    pub fn build(&self, name: &str) -> Store {
        match self {
            DatafileConfig::Sqlite { dir } => Store::Sqlite {
                dir: dir.clone(),
                name: name.to_owned(),
            },
            DatafileConfig::Memory => Store::Memory(MemoryStore::new()),
        }
    }
}

impl FarmConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    /// Minimal config for embedding the engine without a YAML file.
    pub fn new(name: &str, width: usize, height: usize) -> Self {
        Self {
            name: name.to_owned(),
            board: BoardConfig { width, height },
            checkpoint: CheckpointConfig::default(),
            module: ModuleConfig {
                name: "default".to_owned(),
            },
            executor: ExecutorConfig::default(),
            datafile: DatafileConfig::default(),
        }
    }

    /// Attempt to catch all errors instead of piece-by-piece to make
    /// debugging easier for users.
    pub fn preflight_checks(&mut self) -> bool {
        let mut contains_error = false;

        if self.name.is_empty() {
            error!("name cannot be empty, it prefixes the datafile and backups");
            contains_error = true;
        }

        if self.board.width == 0 || self.board.height == 0 {
            error!(
                "board.width and board.height must be > 0, got {}x{}",
                self.board.width, self.board.height
            );
            contains_error = true;
        }

        if self.checkpoint.target == 0 {
            warn!("checkpoint.target is 0, every window holds one record per worker");
        }

        if self.checkpoint.files == 0 {
            warn!("checkpoint.files is 0, no backup snapshots will be kept");
        }

        self.module.name = self.module.name.to_lowercase();
        if let Err(e) = module::load(&self.module.name) {
            error!("module.name is not supported: {e}");
            contains_error = true;
        }

        self.executor.name = self.executor.name.to_lowercase();
        match self.executor.name.as_str() {
            "local" => {}
            executor_name => {
                error!("executor.name ({executor_name}) is not supported, please use `local`");
                contains_error = true;
            }
        }

        if let Some(workers) = self.executor.workers {
            if workers == 0 {
                error!("executor.workers cannot be 0, the farm needs at least one worker");
                contains_error = true;
            }
        }

        contains_error
    }
}

fn default_name() -> String {
    "harrow".to_owned()
}

fn default_checkpoint_target() -> usize {
    2048
}

fn default_checkpoint_files() -> usize {
    2
}

fn default_executor() -> String {
    "local".to_owned()
}

fn default_datafile_dir() -> PathBuf {
    PathBuf::from(".")
}
