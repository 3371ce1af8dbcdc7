//! Worker configuration: constants, duration parsing, and the layered [`WorkerConfig`].
//! Layers apply lowest first: defaults, TOML file, environment, CLI.

use anyhow::{Context, Result, anyhow, bail};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    db_filename: String,
    config_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                db_filename: format!("{pkg}.db"),
                config_filename: format!("{pkg}.toml"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }
}

// ---- Environment names ----

pub struct EnvNames;

impl EnvNames {
    pub const REPOSITORY_URL: &'static str = "COREPO_CONTENT_SERVICE_URL";
    pub const DB_PATH: &'static str = "DB_PATH";
    pub const THREADS: &'static str = "THREADS";
    pub const QUEUE_DEDUPLICATE: &'static str = "QUEUE_DEDUPLICATE";
    pub const POOL_SIZE: &'static str = "JS_POOL_SIZE";
    pub const EXECUTOR_THREADS: &'static str = "EXECUTOR_THREADS";
    pub const USER_AGENT: &'static str = "USER_AGENT";
    pub const POSTPONE: &'static str = "JPA_POSTPONE";
    pub const MAX_TRIES: &'static str = "MAX_TRIES";
    pub const HUNG_AFTER: &'static str = "HUNG_AFTER";
}

// ---- Defaults ----

pub struct Defaults;

impl Defaults {
    pub const THREADS: usize = 5;
    pub const POOL_SIZE: usize = 2;
    pub const USER_AGENT: &'static str = "WorkPresentationWorker/1.0";
    pub const POSTPONE: &'static str = "50ms-1s";
    pub const MAX_TRIES: u32 = 3;
    pub const HUNG_AFTER: Duration = Duration::from_secs(5 * 60);
    /// How long an idle worker thread waits on the queue before checking for shutdown.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
}

// ---- Durations ----

/// Parse `<number><unit>`, e.g. `50ms`, `1s`, `5 minutes`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("duration {s:?} has no unit"))?;
    let (number, unit) = s.split_at(split);
    let n: u64 = number
        .parse()
        .with_context(|| format!("duration {s:?} has no number"))?;
    let d = match unit.trim() {
        "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => Duration::from_millis(n),
        "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs(n * 60),
        other => bail!("unknown duration unit {other:?} in {s:?}"),
    };
    Ok(d)
}

/// Retry delay range. Attempt `n` waits `min * 2^(n-1)`, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Postpone {
    pub min: Duration,
    pub max: Duration,
}

impl Postpone {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.min.saturating_mul(factor).min(self.max)
    }
}

impl Default for Postpone {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(1))
    }
}

impl FromStr for Postpone {
    type Err = anyhow::Error;

    /// `duration-duration` or a single duration.
    fn from_str(s: &str) -> Result<Self> {
        let (lo, hi) = match s.split_once('-') {
            Some((lo, hi)) => (parse_duration(lo)?, parse_duration(hi)?),
            None => {
                let d = parse_duration(s)?;
                (d, d)
            }
        };
        if lo > hi {
            bail!("postpone range {s:?} has lower > higher");
        }
        Ok(Self::new(lo, hi))
    }
}

// ---- Worker configuration ----

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub repository_url: Option<String>,
    pub db_path: PathBuf,
    pub threads: usize,
    pub queue_deduplicate: bool,
    pub pool_size: usize,
    /// Regeneration fan-out; 0 means rayon's default.
    pub executor_threads: usize,
    pub user_agent: String,
    pub postpone: Postpone,
    pub max_tries: u32,
    pub hung_after: Duration,
    pub verbose: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            repository_url: None,
            db_path: PathBuf::from(PackagePaths::get().db_filename()),
            threads: Defaults::THREADS,
            queue_deduplicate: true,
            pool_size: Defaults::POOL_SIZE,
            executor_threads: 0,
            user_agent: Defaults::USER_AGENT.to_string(),
            postpone: Postpone::default(),
            max_tries: Defaults::MAX_TRIES,
            hung_after: Defaults::HUNG_AFTER,
            verbose: false,
        }
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("{name}={raw:?}: {e}"))
}

impl WorkerConfig {
    /// Apply settings found through `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(EnvNames::REPOSITORY_URL) {
            self.repository_url = Some(v);
        }
        if let Some(v) = lookup(EnvNames::DB_PATH) {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(EnvNames::THREADS) {
            self.threads = parse_env(EnvNames::THREADS, &v)?;
        }
        if let Some(v) = lookup(EnvNames::QUEUE_DEDUPLICATE) {
            self.queue_deduplicate = parse_env(EnvNames::QUEUE_DEDUPLICATE, &v)?;
        }
        if let Some(v) = lookup(EnvNames::POOL_SIZE) {
            self.pool_size = parse_env(EnvNames::POOL_SIZE, &v)?;
        }
        if let Some(v) = lookup(EnvNames::EXECUTOR_THREADS) {
            self.executor_threads = parse_env(EnvNames::EXECUTOR_THREADS, &v)?;
        }
        if let Some(v) = lookup(EnvNames::USER_AGENT) {
            self.user_agent = v;
        }
        if let Some(v) = lookup(EnvNames::POSTPONE) {
            self.postpone = v
                .parse()
                .with_context(|| format!("{}={v:?}", EnvNames::POSTPONE))?;
        }
        if let Some(v) = lookup(EnvNames::MAX_TRIES) {
            self.max_tries = parse_env(EnvNames::MAX_TRIES, &v)?;
        }
        if let Some(v) = lookup(EnvNames::HUNG_AFTER) {
            self.hung_after =
                parse_duration(&v).with_context(|| format!("{}={v:?}", EnvNames::HUNG_AFTER))?;
        }
        Ok(())
    }

    /// Process environment, after loading `.env` if one exists.
    pub fn apply_process_env(&mut self) -> Result<()> {
        let _ = dotenvy::dotenv();
        self.apply_env(|name| std::env::var(name).ok())
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads < 1 {
            bail!("threads must be at least 1");
        }
        if self.pool_size < 1 {
            bail!("pool size must be at least 1");
        }
        if self.max_tries < 1 {
            bail!("max tries must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("50ms").unwrap(), Duration::from_millis(50));
        assert_eq!(parse_duration("2 seconds").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("5h").is_err());
    }

    #[test]
    fn postpone_range() {
        let p: Postpone = "50ms-1s".parse().unwrap();
        assert_eq!(p, Postpone::default());
        assert_eq!(p.delay(1), Duration::from_millis(50));
        assert_eq!(p.delay(2), Duration::from_millis(100));
        assert_eq!(p.delay(10), Duration::from_secs(1));
        assert!("2s-1s".parse::<Postpone>().is_err());
    }

    #[test]
    fn env_overrides_defaults() {
        let env: HashMap<&str, &str> = [
            ("THREADS", "3"),
            ("QUEUE_DEDUPLICATE", "false"),
            ("JS_POOL_SIZE", "4"),
            ("HUNG_AFTER", "30s"),
        ]
        .into_iter()
        .collect();
        let mut config = WorkerConfig::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.threads, 3);
        assert!(!config.queue_deduplicate);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.hung_after, Duration::from_secs(30));
        assert_eq!(config.max_tries, Defaults::MAX_TRIES);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut config = WorkerConfig::default();
        let err = config
            .apply_env(|name| (name == "THREADS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("THREADS"));
    }
}
