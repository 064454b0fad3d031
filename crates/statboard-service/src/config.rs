use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the service.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: match env::var("STATSD_SERVER") {
                Ok(metrics_statsd) => Some(metrics_statsd),
                Err(_) => None,
            },
            prefix: "statboard".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Fine-tuning of the snapshot caching engine.
///
/// All durations accept humantime strings, e.g. `1m 30s` or `2 days`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfigs {
    /// Minimum gap between the last triggered regeneration of a snapshot and a caller's
    /// `newer_than` timestamp before a new regeneration is triggered.
    ///
    /// This keeps many clients polling in quick succession from hammering the producer.
    #[serde(with = "humantime_serde")]
    pub staleness_threshold: Duration,

    /// Time-to-live of snapshot records mirrored in the in-memory shim in front of the
    /// durable store. Age is counted since write, not since last access.
    #[serde(with = "humantime_serde")]
    pub memory_ttl: Duration,

    /// Time-to-live of fully rendered response bodies in the fast-path cache.
    #[serde(with = "humantime_serde")]
    pub response_ttl: Duration,

    /// How long snapshots are retained on disk before the cleanup task removes them.
    ///
    /// This is the default retention window; it does not apply to the query family.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// How long query-result snapshots are retained on disk.
    ///
    /// Saved queries are kept around much longer than regular snapshots, which are
    /// superseded whenever a newer generation lands.
    #[serde(with = "humantime_serde")]
    pub query_retention: Duration,

    /// How often the cleanup task enforces the retention windows.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfigs {
    fn default() -> Self {
        CacheConfigs {
            staleness_threshold: Duration::from_secs(60),
            memory_ttl: Duration::from_secs(60),
            response_ttl: Duration::from_secs(120),
            retention: Duration::from_secs(24 * 3600),
            query_retention: Duration::from_secs(30 * 24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

/// See docs/index.md for more information on config values.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Which directory to use for the durable snapshot store. Default is not to persist.
    pub cache_dir: Option<PathBuf>,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// Fine-tune cache expiry and refresh behavior.
    pub caches: CacheConfigs,
}

impl Config {
    /// Loads the config from a YAML file, or falls back to the defaults.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let source = fs::read_to_string(path)
                    .context(format!("failed to open config file {}", path.display()))?;
                serde_yaml::from_str(&source)
                    .context(format!("failed to parse config file {}", path.display()))?
            }
            None => Config::default(),
        };
        Ok(config)
    }

    /// Return a cache directory `dir`, it is joined with the configured base cache directory.
    ///
    /// If there is no base cache directory configured this means no caching should happen
    /// and this returns None.
    pub fn cache_dir<P>(&self, dir: P) -> Option<PathBuf>
    where
        P: AsRef<Path>,
    {
        self.cache_dir.as_ref().map(|base| base.join(dir))
    }
}

fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: de::Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    text.parse().map_err(de::Error::custom)
}
