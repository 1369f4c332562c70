//! Process configuration from `DAYBOOK_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::clock::{Clock, FixedClock, SystemClock};
use crate::model::Day;
use crate::validation::parse_day;

const WAL_FILE: &str = "reservations.wal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Pins "today" instead of following the system clock.
    pub today: Option<Day>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DAYBOOK_TODAY must be a yyyy-mm-dd date, got {0:?}")]
    InvalidToday(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let today = match lookup("DAYBOOK_TODAY") {
            None => None,
            Some(raw) => Some(parse_day(raw.trim()).ok_or(ConfigError::InvalidToday(raw))?),
        };

        Ok(Self {
            port: parse_or(&lookup, "DAYBOOK_PORT", 5433),
            bind: or_default("DAYBOOK_BIND", "0.0.0.0"),
            data_dir: PathBuf::from(or_default("DAYBOOK_DATA_DIR", "./data")),
            password: or_default("DAYBOOK_PASSWORD", "daybook"),
            max_connections: parse_or(&lookup, "DAYBOOK_MAX_CONNECTIONS", 256),
            compact_threshold: parse_or(&lookup, "DAYBOOK_COMPACT_THRESHOLD", 1000),
            metrics_port: lookup("DAYBOOK_METRICS_PORT").and_then(|v| v.trim().parse().ok()),
            tls_cert: lookup("DAYBOOK_TLS_CERT").map(PathBuf::from),
            tls_key: lookup("DAYBOOK_TLS_KEY").map(PathBuf::from),
            today,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        match self.today {
            Some(day) => Arc::new(FixedClock(day)),
            None => Arc::new(SystemClock),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.listen_addr(), "0.0.0.0:5433");
        assert_eq!(c.wal_path(), PathBuf::from("./data/reservations.wal"));
        assert_eq!(c.password, "daybook");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.tls_cert, None);
        assert_eq!(c.today, None);
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("DAYBOOK_PORT", "6000"),
            ("DAYBOOK_BIND", "127.0.0.1"),
            ("DAYBOOK_DATA_DIR", "/var/lib/daybook"),
            ("DAYBOOK_METRICS_PORT", "9100"),
            ("DAYBOOK_COMPACT_THRESHOLD", "10"),
        ])
        .unwrap();
        assert_eq!(c.listen_addr(), "127.0.0.1:6000");
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/daybook/reservations.wal"));
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.compact_threshold, 10);
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let c = config(&[("DAYBOOK_PORT", "http"), ("DAYBOOK_MAX_CONNECTIONS", "-3")]).unwrap();
        assert_eq!(c.port, 5433);
        assert_eq!(c.max_connections, 256);
    }

    #[test]
    fn pinned_today_drives_the_clock() {
        let c = config(&[("DAYBOOK_TODAY", "2026-10-18")]).unwrap();
        let day: Day = "2026-10-18".parse().unwrap();
        assert_eq!(c.today, Some(day));
        assert_eq!(c.clock().today(), day);
    }

    #[test]
    fn bad_today_is_an_error() {
        let err = config(&[("DAYBOOK_TODAY", "18/10/2026")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidToday(raw) if raw == "18/10/2026"));
    }
}
