//! Runtime settings, read from `CAMPERBOOK_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{var}: cannot parse {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub store_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub sessions_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            store_timeout: Duration::from_millis(5000),
            metrics_port: None,
            sessions_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables keep their defaults;
    /// set but malformed ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(bind) = lookup("CAMPERBOOK_BIND") {
            cfg.bind = bind;
        }
        if let Some(port) = parsed(&lookup, "CAMPERBOOK_PORT")? {
            cfg.port = port;
        }
        if let Some(dir) = lookup("CAMPERBOOK_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(max) = parsed(&lookup, "CAMPERBOOK_MAX_CONNECTIONS")? {
            cfg.max_connections = max;
        }
        if let Some(threshold) = parsed(&lookup, "CAMPERBOOK_COMPACT_THRESHOLD")? {
            cfg.compact_threshold = threshold;
        }
        if let Some(ms) = parsed::<u64>(&lookup, "CAMPERBOOK_STORE_TIMEOUT_MS")? {
            cfg.store_timeout = Duration::from_millis(ms);
        }
        cfg.metrics_port = parsed(&lookup, "CAMPERBOOK_METRICS_PORT")?;
        cfg.sessions_file = lookup("CAMPERBOOK_SESSIONS_FILE").map(PathBuf::from);
        Ok(cfg)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("items.wal")
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
    }
}
