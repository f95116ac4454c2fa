use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineSettings;
use crate::model::Ms;

/// Daemon configuration, read from `TOURHOLD_*` environment variables.
/// Absent or unparsable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub hold_window: Duration,
    pub sweep_interval: Duration,
    pub store_timeout: Duration,
    pub slot_cache_ttl: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            hold_window: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(300),
            store_timeout: Duration::from_millis(5000),
            slot_cache_ttl: Duration::from_secs(30),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            data_dir: lookup("TOURHOLD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            hold_window: parsed(&lookup, "TOURHOLD_HOLD_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.hold_window),
            sweep_interval: parsed(&lookup, "TOURHOLD_SWEEP_INTERVAL_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.sweep_interval),
            store_timeout: parsed(&lookup, "TOURHOLD_STORE_TIMEOUT_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(d.store_timeout),
            slot_cache_ttl: parsed(&lookup, "TOURHOLD_SLOT_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.slot_cache_ttl),
            compact_threshold: parsed(&lookup, "TOURHOLD_COMPACT_THRESHOLD")
                .unwrap_or(d.compact_threshold),
            metrics_port: parsed(&lookup, "TOURHOLD_METRICS_PORT"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("tourhold.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            hold_window_ms: self.hold_window.as_millis() as Ms,
            store_timeout: self.store_timeout,
            slot_cache_ttl_ms: self.slot_cache_ttl.as_millis() as Ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config, Config::default());
        let settings = config.engine_settings();
        assert_eq!(settings.hold_window_ms, 600_000);
        assert_eq!(settings.store_timeout, Duration::from_secs(5));
        assert_eq!(settings.slot_cache_ttl_ms, 30_000);
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            ("TOURHOLD_DATA_DIR", "/var/lib/tourhold"),
            ("TOURHOLD_HOLD_WINDOW_SECS", "120"),
            ("TOURHOLD_SWEEP_INTERVAL_SECS", "0"),
            ("TOURHOLD_STORE_TIMEOUT_MS", "soon"),
            ("TOURHOLD_COMPACT_THRESHOLD", "50"),
            ("TOURHOLD_METRICS_PORT", "9100"),
        ]));
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/tourhold/tourhold.wal"));
        assert_eq!(config.hold_window, Duration::from_secs(120));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.store_timeout, Duration::from_millis(5000));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9100));
    }
}
