use crate::events::DEFAULT_CAPACITY;
use crate::log_batcher::DEFAULT_FLUSH_INTERVAL;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub port: u16,
    pub cache_dir: PathBuf,
    pub log_flush_interval: Duration,
    /// Events buffered per topic before a slow subscriber starts losing them.
    pub event_capacity: usize,
    pub python: String,
    pub git: Option<PathBuf>,
    pub device_catalog: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cache_dir: env::temp_dir().join("firmware-runner").join("repositories"),
            log_flush_interval: DEFAULT_FLUSH_INTERVAL,
            event_capacity: DEFAULT_CAPACITY,
            python: "python3".to_string(),
            git: None,
            device_catalog: None,
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = parse_or(&lookup, "PORT", defaults.port);
        let event_capacity = parse_or(&lookup, "EVENT_BUFFER_CAPACITY", defaults.event_capacity);
        let flush_ms = parse_or(
            &lookup,
            "LOG_BATCH_INTERVAL_MS",
            defaults.log_flush_interval.as_millis() as u64,
        );

        Self {
            port,
            cache_dir: non_empty(&lookup, "FIRMWARE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            log_flush_interval: Duration::from_millis(flush_ms.max(1)),
            event_capacity: event_capacity.max(1),
            python: non_empty(&lookup, "PYTHON_BIN").unwrap_or(defaults.python),
            git: non_empty(&lookup, "GIT_BIN").map(PathBuf::from),
            device_catalog: non_empty(&lookup, "DEVICE_CATALOG").map(PathBuf::from),
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.trim().is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy,
{
    match non_empty(lookup, key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}
