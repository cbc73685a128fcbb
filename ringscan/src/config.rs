use config::{Config as ConfigBuilder, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{ScanError, ScanResult};
use crate::predicate::{ComparisonMode, LengthPredicate};
use crate::ringbuf::MIN_CAPACITY;
use crate::source::DEFAULT_MAX_LINE_LENGTH;

/// Keys recognised in configuration files
const KNOWN_KEYS: &[&str] = &[
    "number_of_producers",
    "number_of_consumers",
    "pointer_array_size",
    "source_file",
    "magic_number_length",
    "search_mode",
    "log_mode",
    "nk",
    "max_line_length",
    "encoding",
    "log_level",
];

/// Configuration for a scanning run.
///
/// # Configuration Locations
///
/// Files are layered, later ones overriding earlier ones:
/// 1. Global `$CONFIG_DIR/ringscan/config.yaml`
/// 2. Local `.ringscan.yaml` in the current directory
/// 3. The file passed on the command line
///
/// # Configuration Format
///
/// ```yaml
/// number_of_producers: 2
/// number_of_consumers: 3
/// # Total slots; one is always kept free
/// pointer_array_size: 16
/// source_file: "input.txt"
/// magic_number_length: 10
/// # -1 less than, 0 equal, 1 greater than
/// search_mode: 0
/// # 0 simplified, 1 full
/// log_mode: 1
/// # Seconds until cancellation; 0 waits for Ctrl-C instead
/// nk: 5
/// ```
///
/// Values may also be quoted strings (`nk: "5"`). Unknown keys are
/// reported and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Number of producer threads
    #[serde(rename = "number_of_producers")]
    pub producer_count: NonZeroUsize,

    /// Number of consumer threads
    #[serde(rename = "number_of_consumers")]
    pub consumer_count: NonZeroUsize,

    /// Slots in the ring buffer, including the one kept free
    #[serde(rename = "pointer_array_size")]
    pub capacity: usize,

    /// File the producers read from
    #[serde(rename = "source_file")]
    pub source_path: PathBuf,

    /// Length that lines are compared against
    #[serde(rename = "magic_number_length")]
    pub threshold_length: usize,

    #[serde(rename = "search_mode")]
    pub comparison_mode: ComparisonMode,

    #[serde(rename = "log_mode")]
    pub verbosity: Verbosity,

    /// Run duration in seconds; 0 disables the deadline
    #[serde(rename = "nk", default)]
    pub deadline_seconds: u64,

    /// Longer lines are truncated to this many bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// How to handle invalid UTF-8 in the source
    #[serde(default)]
    pub encoding: EncodingMode,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// How much progress output workers produce.
///
/// Written as `0` (simplified) or `1` (full) in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Verbosity {
    /// Slot traces and worker lifecycle as well as matches
    Full,
    /// Only matches
    Simplified,
}

impl Verbosity {
    pub fn is_full(self) -> bool {
        matches!(self, Verbosity::Full)
    }
}

impl TryFrom<i64> for Verbosity {
    type Error = ScanError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Verbosity::Simplified),
            1 => Ok(Verbosity::Full),
            other => Err(ScanError::config_error(format!(
                "log_mode must be 0 or 1, got {}",
                other
            ))),
        }
    }
}

impl From<Verbosity> for i64 {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Simplified => 0,
            Verbosity::Full => 1,
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verbosity::Full => write!(f, "full"),
            Verbosity::Simplified => write!(f, "simplified"),
        }
    }
}

/// How to handle invalid UTF-8 sequences in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Abort the run on the first invalid line
    FailFast,
    /// Replace invalid sequences with U+FFFD
    #[default]
    Lossy,
}

/// Values given on the command line; `None` keeps the file's value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub producer_count: Option<NonZeroUsize>,
    pub consumer_count: Option<NonZeroUsize>,
    pub capacity: Option<usize>,
    pub deadline: Option<Duration>,
    pub verbose: bool,
    pub log_level: Option<String>,
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl ScanConfig {
    /// Loads configuration from the default locations
    pub fn load() -> ScanResult<Self> {
        Self::load_from(None)
    }

    /// Loads configuration, layering `config_path` over the default locations.
    /// The explicit file is parsed as YAML whatever its extension.
    pub fn load_from(config_path: Option<&Path>) -> ScanResult<Self> {
        let mut builder = ConfigBuilder::builder();

        let defaults = [
            // Global config
            dirs::config_dir().map(|p| p.join("ringscan/config.yaml")),
            // Local config
            Some(PathBuf::from(".ringscan.yaml")),
        ];
        for path in defaults.iter().flatten() {
            if path.exists() {
                debug!("Layering config file {}", path.display());
                builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Yaml));
            }
        }

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ScanError::file_not_found(path));
            }
            builder = builder.add_source(
                File::new(&path.to_string_lossy(), FileFormat::Yaml).required(true),
            );
        }

        let built = builder.build()?;
        let table: HashMap<String, config::Value> = built.clone().try_deserialize()?;
        warn_unknown_keys(table.keys());

        let config: ScanConfig = built.try_deserialize()?;
        Ok(config)
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli: &ConfigOverrides) -> Self {
        // CLI values take precedence over config file values
        if let Some(count) = cli.producer_count {
            self.producer_count = count;
        }
        if let Some(count) = cli.consumer_count {
            self.consumer_count = count;
        }
        if let Some(capacity) = cli.capacity {
            self.capacity = capacity;
        }
        if let Some(deadline) = cli.deadline {
            // Round partial seconds up so a short deadline never becomes "none"
            self.deadline_seconds = deadline
                .as_secs()
                .saturating_add(u64::from(deadline.subsec_nanos() > 0));
        }
        if cli.verbose {
            self.verbosity = Verbosity::Full;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
        self
    }

    /// Checks the ranges serde cannot express
    pub fn validate(&self) -> ScanResult<()> {
        if self.capacity < MIN_CAPACITY {
            return Err(ScanError::config_error(format!(
                "pointer_array_size must be at least {}, got {}",
                MIN_CAPACITY, self.capacity
            )));
        }
        if self.max_line_length == 0 {
            return Err(ScanError::config_error("max_line_length must be positive"));
        }
        if self.source_path.as_os_str().is_empty() {
            return Err(ScanError::config_error("source_file must not be empty"));
        }
        Ok(())
    }

    /// The predicate consumers apply to each line
    pub fn predicate(&self) -> LengthPredicate {
        LengthPredicate::new(self.threshold_length, self.comparison_mode)
    }

    /// `None` when the run waits for an interrupt instead of a timer
    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_seconds > 0).then(|| Duration::from_secs(self.deadline_seconds))
    }

    /// Renders the effective configuration in the file format
    pub fn to_yaml(&self) -> ScanResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn warn_unknown_keys<'a>(keys: impl Iterator<Item = &'a String>) {
    for key in keys {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            warn!("Unknown key in config file: {}", key);
        }
    }
}
