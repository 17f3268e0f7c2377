//! Runtime configuration
//!
//! Values are layered, later sources winning:
//! built-in defaults, `config.toml`, `FMSEARCH_*` environment variables,
//! then command-line flags.
//!
//! ```toml
//! [index]
//! data_suffix = ".ap"
//! index_suffix = ".fm"
//! fmindex_sample_rate = 32
//! rrr_sample_rate = 8
//!
//! [server]
//! autocomplete_limit = 20
//! autocomplete_length = 20
//! search_limit = 20
//! request_timeout_ms = 1000
//! request_count = 100
//! poll_interval_ms = 500
//! socket = "/run/user/1000/fmsearch.sock"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Args;
use serde::Deserialize;
use thiserror::Error;

use crate::index::BuildParams;
use crate::index::fm_index::DEFAULT_SAMPLE_RATE;
use crate::index::rrr::DEFAULT_SAMPLE_LEN;
use crate::server::executor::QueryLimits;

pub const DEFAULT_DATA_SUFFIX: &str = ".ap";
pub const DEFAULT_INDEX_SUFFIX: &str = ".fm";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{var}={value:?} is not a valid value")]
    Env { var: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration file format (TOML)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub index: IndexSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// `[index]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSection {
    pub data_suffix: Option<String>,
    pub index_suffix: Option<String>,
    pub fmindex_sample_rate: Option<u32>,
    pub rrr_sample_rate: Option<u32>,
}

/// `[server]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub autocomplete_limit: Option<usize>,
    pub autocomplete_length: Option<usize>,
    pub search_limit: Option<usize>,
    pub request_timeout_ms: Option<u64>,
    pub request_count: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub socket: Option<PathBuf>,
}

/// Command-line overrides, shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Read settings from this file instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Suffix selecting data files
    #[arg(short = 's', long, global = true)]
    pub data_suffix: Option<String>,
    /// Suffix appended to a data file name to form its index
    #[arg(short = 'S', long, global = true)]
    pub index_suffix: Option<String>,
    /// Keep every Nth suffix array entry
    #[arg(short = 'f', long, global = true)]
    pub fmindex_sample_rate: Option<u32>,
    /// Blocks between rank samples of the compressed bit vectors
    #[arg(long, global = true)]
    pub rrr_sample_rate: Option<u32>,
    /// Completions gathered per request
    #[arg(long, global = true)]
    pub autocomplete_limit: Option<usize>,
    /// Bytes of context shown after the pattern in a completion
    #[arg(long, global = true)]
    pub autocomplete_length: Option<usize>,
    /// Matches listed per search request
    #[arg(short = 'l', long, global = true)]
    pub search_limit: Option<usize>,
    /// Drop a client that sends nothing for this many milliseconds
    #[arg(long = "request-timeout", global = true)]
    pub request_timeout_ms: Option<u64>,
    /// Stop serving after this many connections
    #[arg(long, global = true)]
    pub request_count: Option<u64>,
    /// Milliseconds between scans of the data directory
    #[arg(long = "poll-interval", global = true)]
    pub poll_interval_ms: Option<u64>,
    /// Unix socket to listen on or connect to
    #[arg(short = 'p', long, global = true)]
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the data files, when the command needs one
    pub data_dir: Option<PathBuf>,
    pub data_suffix: String,
    pub index_suffix: String,
    pub fmindex_sample_rate: u32,
    pub rrr_sample_rate: u32,
    pub autocomplete_limit: usize,
    pub autocomplete_length: usize,
    pub search_limit: usize,
    pub request_timeout_ms: u64,
    /// Connections accepted before the server stops, unlimited when `None`
    pub request_count: Option<u64>,
    pub poll_interval_ms: u64,
    /// Explicit socket path; see [`crate::server::socket_path`] for the fallback
    pub socket: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            data_suffix: DEFAULT_DATA_SUFFIX.to_string(),
            index_suffix: DEFAULT_INDEX_SUFFIX.to_string(),
            fmindex_sample_rate: DEFAULT_SAMPLE_RATE,
            rrr_sample_rate: DEFAULT_SAMPLE_LEN,
            autocomplete_limit: 20,
            autocomplete_length: 20,
            search_limit: 20,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            request_count: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            socket: None,
        }
    }
}

/// `config.toml` in the per-user configuration directory
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fmsearch").join("config.toml"))
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn env_override<T: FromStr>(var: &'static str, slot: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(var) {
        *slot = value.parse().map_err(|_| ConfigError::Env { var, value })?;
    }
    Ok(())
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl Config {
    /// Defaults overlaid with the config file and the environment.
    ///
    /// An explicit `config_path` must exist; the default location is
    /// optional.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let file = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => match default_config_path() {
                Some(path) if path.exists() => Some(read_config_file(&path)?),
                _ => None,
            },
        };
        if let Some(file) = file {
            config.apply_file(file);
        }
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: ConfigFile) {
        let ConfigFile { index, server } = file;
        set(&mut self.data_suffix, index.data_suffix);
        set(&mut self.index_suffix, index.index_suffix);
        set(&mut self.fmindex_sample_rate, index.fmindex_sample_rate);
        set(&mut self.rrr_sample_rate, index.rrr_sample_rate);
        set(&mut self.autocomplete_limit, server.autocomplete_limit);
        set(&mut self.autocomplete_length, server.autocomplete_length);
        set(&mut self.search_limit, server.search_limit);
        set(&mut self.request_timeout_ms, server.request_timeout_ms);
        set(&mut self.poll_interval_ms, server.poll_interval_ms);
        if server.request_count.is_some() {
            self.request_count = server.request_count;
        }
        if server.socket.is_some() {
            self.socket = server.socket;
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_override("FMSEARCH_DATA_SUFFIX", &mut self.data_suffix)?;
        env_override("FMSEARCH_INDEX_SUFFIX", &mut self.index_suffix)?;
        env_override("FMSEARCH_FMINDEX_SAMPLE_RATE", &mut self.fmindex_sample_rate)?;
        env_override("FMSEARCH_RRR_SAMPLE_RATE", &mut self.rrr_sample_rate)?;
        env_override("FMSEARCH_AUTOCOMPLETE_LIMIT", &mut self.autocomplete_limit)?;
        env_override("FMSEARCH_AUTOCOMPLETE_LENGTH", &mut self.autocomplete_length)?;
        env_override("FMSEARCH_SEARCH_LIMIT", &mut self.search_limit)?;
        env_override("FMSEARCH_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms)?;
        env_override("FMSEARCH_POLL_INTERVAL_MS", &mut self.poll_interval_ms)?;

        let mut count = 0;
        if std::env::var_os("FMSEARCH_REQUEST_COUNT").is_some() {
            env_override("FMSEARCH_REQUEST_COUNT", &mut count)?;
            self.request_count = Some(count);
        }
        if let Some(socket) = std::env::var_os("FMSEARCH_SOCKET") {
            self.socket = Some(PathBuf::from(socket));
        }
        Ok(())
    }

    pub fn apply_args(&mut self, args: &ConfigArgs) {
        let args = args.clone();
        set(&mut self.data_suffix, args.data_suffix);
        set(&mut self.index_suffix, args.index_suffix);
        set(&mut self.fmindex_sample_rate, args.fmindex_sample_rate);
        set(&mut self.rrr_sample_rate, args.rrr_sample_rate);
        set(&mut self.autocomplete_limit, args.autocomplete_limit);
        set(&mut self.autocomplete_length, args.autocomplete_length);
        set(&mut self.search_limit, args.search_limit);
        set(&mut self.request_timeout_ms, args.request_timeout_ms);
        set(&mut self.poll_interval_ms, args.poll_interval_ms);
        if args.request_count.is_some() {
            self.request_count = args.request_count;
        }
        if args.socket.is_some() {
            self.socket = args.socket;
        }
    }

    /// Full layering for a command line
    pub fn from_args(args: &ConfigArgs, data_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply_args(args);
        config.data_dir = data_dir;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.data_suffix.is_empty() {
            return invalid("data suffix must not be empty");
        }
        if self.index_suffix.is_empty() {
            return invalid("index suffix must not be empty");
        }
        if self.data_suffix.ends_with(&self.index_suffix) {
            // an index file would itself look like a data file
            return invalid("data suffix must not end with the index suffix");
        }
        if self.fmindex_sample_rate == 0 {
            return invalid("fmindex sample rate must be positive");
        }
        if self.rrr_sample_rate == 0 {
            return invalid("rrr sample rate must be positive");
        }
        if self.autocomplete_limit == 0 || self.search_limit == 0 {
            return invalid("result limits must be positive");
        }
        if self.request_timeout_ms == 0 {
            return invalid("request timeout must be positive");
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll interval must be positive");
        }
        match &self.data_dir {
            Some(dir) if !dir.is_dir() => Err(ConfigError::Invalid(format!(
                "{} is not a directory",
                dir.display()
            ))),
            _ => Ok(()),
        }
    }

    pub fn build_params(&self) -> BuildParams {
        BuildParams {
            sample_rate: self.fmindex_sample_rate,
            rrr_sample_rate: self.rrr_sample_rate,
        }
    }

    pub fn query_limits(&self) -> QueryLimits {
        QueryLimits {
            autocomplete_limit: self.autocomplete_limit,
            autocomplete_length: self.autocomplete_length,
            search_limit: self.search_limit,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.build_params(), BuildParams::default());
        assert_eq!(config.query_limits(), QueryLimits::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [index]
            data_suffix = ".log"
            fmindex_sample_rate = 16

            [server]
            search_limit = 50
            request_count = 3
            "#,
        )
        .unwrap();
        let mut config = Config::default();
        config.apply_file(file);
        assert_eq!(config.data_suffix, ".log");
        assert_eq!(config.fmindex_sample_rate, 16);
        assert_eq!(config.search_limit, 50);
        assert_eq!(config.request_count, Some(3));
        assert_eq!(config.index_suffix, DEFAULT_INDEX_SUFFIX);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<ConfigFile>("[index]\nsample = 3\n").is_err());
    }

    #[test]
    fn test_explicit_config_file_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let path = dir.path().join("bad.toml");
        fs::write(&path, "[server\n").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_args_override_file() {
        let mut config = Config::default();
        config.apply_file(toml::from_str("[server]\nsearch_limit = 50\n").unwrap());
        config.apply_args(&ConfigArgs {
            search_limit: Some(5),
            socket: Some(PathBuf::from("/tmp/x.sock")),
            ..ConfigArgs::default()
        });
        assert_eq!(config.search_limit, 5);
        assert_eq!(config.socket, Some(PathBuf::from("/tmp/x.sock")));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_rate = Config {
            fmindex_sample_rate: 0,
            ..Config::default()
        };
        assert!(zero_rate.validate().is_err());

        let clashing = Config {
            data_suffix: ".fm".into(),
            index_suffix: ".fm".into(),
            ..Config::default()
        };
        assert!(clashing.validate().is_err());

        let dir = tempfile::tempdir().unwrap();
        let missing = Config {
            data_dir: Some(dir.path().join("nope")),
            ..Config::default()
        };
        assert!(missing.validate().is_err());
        let present = Config {
            data_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        assert!(present.validate().is_ok());
    }
}
