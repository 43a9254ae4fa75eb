use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Server settings, read once at startup from `PARKLOT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Prometheus exporter port; metrics are off when unset.
    pub metrics_port: Option<u16>,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    /// Create the default lot layout on an empty store.
    pub seed_lots: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            seed_lots: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("PARKLOT_BIND").unwrap_or(defaults.bind),
            port: parse_or(&lookup, "PARKLOT_PORT", defaults.port),
            data_dir: lookup("PARKLOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("PARKLOT_METRICS_PORT")
                .and_then(|raw| parse("PARKLOT_METRICS_PORT", &raw)),
            compact_threshold: parse_or(
                &lookup,
                "PARKLOT_COMPACT_THRESHOLD",
                defaults.compact_threshold,
            ),
            seed_lots: parse_or(&lookup, "PARKLOT_SEED_LOTS", defaults.seed_lots),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("parklot.wal")
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Option<T>
where
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| warn!("invalid {key} value {raw:?}: {e}"))
        .ok()
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T::Err: Display,
{
    lookup(key)
        .and_then(|raw| parse(key, &raw))
        .unwrap_or(default)
}
