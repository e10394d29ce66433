//! Driver configuration: YAML file, then command-line overrides.

use std::path::{Path, PathBuf};

use clap::Args;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{warn, Level};

use qone_exec::{AggrFlavour, ExecError, KernelConfig, Layout, SchedulerConfig, SimdFlavour};

/// Result type alias for configuration handling.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file unreadable.
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid YAML for [`Config`].
    #[error("parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Kernel or scheduler settings rejected.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// Any other invalid value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Input table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DataConfig {
    /// Generated row count, ignored when `tbl` is set.
    pub rows: usize,
    /// Generator seed.
    pub seed: u64,
    /// dbgen `lineitem.tbl` to load instead of generating.
    pub tbl: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { rows: 1_000_000, seed: 42, tbl: None }
    }
}

/// Repetition and query shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RunConfig {
    /// Timed repetitions.
    pub repetitions: usize,
    /// Rows below this offset take the push-down path. 0 disables it.
    pub pushdown_boundary: usize,
    /// The submitting thread processes morsels too.
    pub active_wait: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { repetitions: 3, pushdown_boundary: 0, active_wait: false }
    }
}

/// Logging destination and level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LogConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
    /// Rolling JSON log directory; stderr when unset.
    pub dir: Option<PathBuf>,
    /// Extra filter directives applied once the config is validated,
    /// e.g. `qone_exec=debug,info`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), dir: None, filter: None }
    }
}

impl LogConfig {
    /// Parsed level.
    pub fn level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

/// Complete driver configuration. Every field has a default, so an empty
/// file is valid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Input table.
    pub data: DataConfig,
    /// Per-worker kernel.
    pub kernel: KernelConfig,
    /// Worker pool.
    pub scheduler: SchedulerConfig,
    /// Repetitions and query shape.
    pub run: RunConfig,
    /// Logging.
    pub log: LogConfig,
}

impl Config {
    /// Parse YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read and parse a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Reject unusable settings. A repetition count of zero is raised to one.
    pub fn validate(&mut self) -> Result<()> {
        self.kernel.validate()?;
        self.scheduler.validate()?;
        self.log.level()?;
        if self.run.repetitions == 0 {
            warn!("repetitions = 0, running once");
            self.run.repetitions = 1;
        }
        if self.run.pushdown_boundary % 32 != 0 {
            return Err(ConfigError::Invalid(format!(
                "push-down boundary {} is not a multiple of 32",
                self.run.pushdown_boundary
            )));
        }
        Ok(())
    }
}

/// Command-line overrides. Unset flags keep the file or default value.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// YAML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Rows to generate.
    #[arg(long)]
    pub rows: Option<usize>,
    /// Generator seed.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Load a dbgen lineitem.tbl instead of generating.
    #[arg(long)]
    pub tbl: Option<PathBuf>,
    /// one-step | multiple-prims | shuffle | shuffle-fused | no-aggr
    #[arg(long)]
    pub flavour: Option<AggrFlavour>,
    /// nsm | dsm
    #[arg(long)]
    pub layout: Option<Layout>,
    /// scalar | compare | population-count
    #[arg(long)]
    pub simd: Option<SimdFlavour>,
    /// Worker threads.
    #[arg(long)]
    pub threads: Option<usize>,
    /// Rows per morsel, a multiple of 32.
    #[arg(long)]
    pub morsel_size: Option<usize>,
    /// Rows per batch, a multiple of 32 up to 8192.
    #[arg(long)]
    pub vector_size: Option<usize>,
    /// Timed repetitions.
    #[arg(long)]
    pub repetitions: Option<usize>,
    /// Rows below this offset take the push-down path.
    #[arg(long)]
    pub pushdown_boundary: Option<usize>,
    /// The submitting thread processes morsels too.
    #[arg(long)]
    pub active_wait: bool,
    /// Derive the pool from half the machine.
    #[arg(long)]
    pub partial_system: bool,
    /// Leave one core free.
    #[arg(long)]
    pub reserve_core: bool,
    /// Log level.
    #[arg(long)]
    pub log_level: Option<String>,
    /// Rolling JSON log directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Per-target filter directives, e.g. `qone_exec=debug,info`.
    #[arg(long)]
    pub log_filter: Option<String>,
}

impl Overrides {
    /// File configuration (or defaults) with these overrides applied.
    pub fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    /// Overwrite every field set on the command line.
    pub fn apply(&self, config: &mut Config) {
        fn set<T: Clone>(dst: &mut T, src: &Option<T>) {
            if let Some(v) = src {
                *dst = v.clone();
            }
        }
        set(&mut config.data.rows, &self.rows);
        set(&mut config.data.seed, &self.seed);
        if self.tbl.is_some() {
            config.data.tbl = self.tbl.clone();
        }
        set(&mut config.kernel.flavour, &self.flavour);
        set(&mut config.kernel.layout, &self.layout);
        set(&mut config.kernel.simd, &self.simd);
        set(&mut config.kernel.vector_size, &self.vector_size);
        if self.threads.is_some() {
            config.scheduler.threads = self.threads;
        }
        set(&mut config.scheduler.morsel_size, &self.morsel_size);
        config.scheduler.full_system &= !self.partial_system;
        config.scheduler.reserve_core |= self.reserve_core;
        set(&mut config.run.repetitions, &self.repetitions);
        set(&mut config.run.pushdown_boundary, &self.pushdown_boundary);
        config.run.active_wait |= self.active_wait;
        set(&mut config.log.level, &self.log_level);
        if self.log_dir.is_some() {
            config.log.dir = self.log_dir.clone();
        }
        if self.log_filter.is_some() {
            config.log.filter = self.log_filter.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_is_default() {
        let mut config = Config::from_yaml("{}").unwrap();
        assert_eq!(config, Config::default());
        config.validate().unwrap();
    }

    #[test]
    fn nested_kebab_case_fields() {
        let yaml = r#"
data:
  rows: 5000
kernel:
  flavour: shuffle-fused
  layout: dsm
  simd: population-count
  vector-size: 2048
scheduler:
  threads: 4
  morsel-size: 4096
  reserve-core: true
run:
  repetitions: 0
  pushdown-boundary: 1024
log:
  filter: qone_exec=debug,info
"#;
        let mut config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.data.rows, 5_000);
        assert_eq!(config.kernel.flavour, AggrFlavour::ShuffleFused);
        assert_eq!(config.kernel.layout, Layout::Dsm);
        assert_eq!(config.kernel.simd, SimdFlavour::PopulationCount);
        assert_eq!(config.kernel.vector_size, 2_048);
        assert_eq!(config.scheduler.threads, Some(4));
        assert!(config.scheduler.reserve_core && config.scheduler.full_system);
        config.validate().unwrap();
        assert_eq!(config.run.repetitions, 1);
        assert_eq!(config.log.filter.as_deref(), Some("qone_exec=debug,info"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_yaml("kernel: { flavour: turbo }").is_err());

        let mut config = Config::from_yaml("kernel: { vector-size: 100 }").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Exec(ExecError::VectorSize(100)))));

        let mut config = Config::from_yaml("run: { pushdown-boundary: 33 }").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::from_yaml("log: { level: loud }").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config = Config::from_yaml("data: { rows: 10 }\nscheduler: { threads: 2 }").unwrap();
        let overrides = Overrides {
            rows: Some(99),
            flavour: Some(AggrFlavour::MultiplePrims),
            partial_system: true,
            active_wait: true,
            ..Overrides::default()
        };
        overrides.apply(&mut config);
        assert_eq!(config.data.rows, 99);
        assert_eq!(config.kernel.flavour, AggrFlavour::MultiplePrims);
        assert_eq!(config.scheduler.threads, Some(2));
        assert!(!config.scheduler.full_system);
        assert!(config.run.active_wait);
    }
}
