//! Environment-sourced settings for the API and worker processes.
//!
//! Every key has a default. A value that is present but malformed is an error
//! rather than a silent fallback.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use thiserror::Error;
use tokio::sync::Semaphore;

use heroes_observability::LogSettings;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Deployment environment tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    pub name: String,
    pub description: String,
    pub version: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    pub user: String,
    pub password: String,
    pub server: String,
    pub port: u16,
    pub db: String,
    pub max_connections: u32,
}

impl PostgresSettings {
    /// Connection options built field by field, so the password needs no escaping.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.server)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.db)
    }

    /// Connection string with the password masked, for logs.
    pub fn redacted_uri(&self) -> String {
        format!(
            "postgresql://{}:***@{}:{}/{}",
            self.user, self.server, self.port, self.db
        )
    }
}

impl fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("uri", &self.redacted_uri())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisQueueSettings {
    pub host: String,
    pub port: u16,
}

impl RedisQueueSettings {
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Largest accepted `WORKER_MAX_JOBS`; the worker holds one semaphore
/// permit per running job and waits for all of them with a `u32` count.
pub const MAX_WORKER_JOBS: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub max_jobs: usize,
    pub poll_timeout: Duration,
    pub keep_result: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_jobs: 10,
            poll_timeout: Duration::from_secs(5),
            keep_result: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub log: LogSettings,
    pub postgres: PostgresSettings,
    pub redis: RedisQueueSettings,
    pub environment: Environment,
    pub server: ServerSettings,
    pub use_persistent_stores: bool,
    pub worker: WorkerSettings,
}

impl Settings {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        Ok(Self {
            app: AppSettings {
                name: env.string("APP_NAME", "Heroes API"),
                description: env.string("APP_DESCRIPTION", "CRUD API for heroes and their abilities"),
                version: env.string("APP_VERSION", env!("CARGO_PKG_VERSION")),
                contact_name: env.optional("CONTACT_NAME"),
                contact_email: env.optional("CONTACT_EMAIL"),
            },
            log: LogSettings {
                level: env.string("LOG_LEVEL", "INFO"),
                json: env.flag("LOG_JSON_FORMAT", false)?,
            },
            postgres: PostgresSettings {
                user: env.string("POSTGRES_USER", "postgres"),
                password: env.string("POSTGRES_PASSWORD", "postgres"),
                server: env.string("POSTGRES_SERVER", "localhost"),
                port: env.parsed("POSTGRES_PORT", 5432)?,
                db: env.string("POSTGRES_DB", "postgres"),
                max_connections: env.parsed("POSTGRES_MAX_CONNECTIONS", 10)?,
            },
            redis: RedisQueueSettings {
                host: env.string("REDIS_QUEUE_HOST", "localhost"),
                port: env.parsed("REDIS_QUEUE_PORT", 6379)?,
            },
            environment: env.parsed("ENVIRONMENT", Environment::Local)?,
            server: ServerSettings {
                host: env.string("SERVER_HOST", "0.0.0.0"),
                port: env.parsed("SERVER_PORT", 8080)?,
            },
            use_persistent_stores: env.flag("USE_PERSISTENT_STORES", true)?,
            worker: WorkerSettings {
                max_jobs: env.bounded("WORKER_MAX_JOBS", 10, 1..=MAX_WORKER_JOBS)?,
                poll_timeout: Duration::from_secs(env.parsed("WORKER_POLL_TIMEOUT_SECS", 5)?),
                keep_result: Duration::from_secs(env.parsed("WORKER_KEEP_RESULT_SECS", 3600)?),
            },
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn bounded(
        &self,
        key: &'static str,
        default: usize,
        range: RangeInclusive<usize>,
    ) -> Result<usize, ConfigError> {
        let value = self.parsed(key, default)?;
        if range.contains(&value) {
            Ok(value)
        } else {
            Err(ConfigError::Invalid { key, value: value.to_string() })
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid { key, value }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.app.name, "Heroes API");
        assert_eq!(s.log.level, "INFO");
        assert!(!s.log.json);
        assert_eq!(s.postgres.port, 5432);
        assert_eq!(s.postgres.max_connections, 10);
        assert_eq!(s.redis.url(), "redis://localhost:6379");
        assert_eq!(s.environment, Environment::Local);
        assert_eq!(s.server.bind_addr(), "0.0.0.0:8080");
        assert!(s.use_persistent_stores);
        assert_eq!(s.worker, WorkerSettings::default());
    }

    #[test]
    fn reads_overrides() {
        let s = settings(&[
            ("APP_NAME", "Justice League"),
            ("LOG_JSON_FORMAT", "true"),
            ("POSTGRES_SERVER", "db"),
            ("POSTGRES_PORT", "6543"),
            ("ENVIRONMENT", "Production"),
            ("USE_PERSISTENT_STORES", "0"),
            ("WORKER_MAX_JOBS", "3"),
            ("WORKER_POLL_TIMEOUT_SECS", "1"),
        ])
        .unwrap();

        assert_eq!(s.app.name, "Justice League");
        assert!(s.log.json);
        assert_eq!(s.postgres.redacted_uri(), "postgresql://postgres:***@db:6543/postgres");
        assert_eq!(s.environment, Environment::Production);
        assert!(!s.use_persistent_stores);
        assert_eq!(s.worker.max_jobs, 3);
        assert_eq!(s.worker.poll_timeout, Duration::from_secs(1));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = settings(&[("POSTGRES_PORT", "five")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid { key: "POSTGRES_PORT", value: "five".into() }
        );

        assert!(settings(&[("ENVIRONMENT", "qa")]).is_err());
        assert!(settings(&[("LOG_JSON_FORMAT", "maybe")]).is_err());
    }

    #[test]
    fn worker_max_jobs_is_bounded() {
        let err = settings(&[("WORKER_MAX_JOBS", "0")]).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { key: "WORKER_MAX_JOBS", value: "0".into() });

        let too_many = (MAX_WORKER_JOBS as u128 + 1).to_string();
        assert!(settings(&[("WORKER_MAX_JOBS", too_many.as_str())]).is_err());
        assert!(settings(&[("WORKER_MAX_JOBS", "-1")]).is_err());

        let max = MAX_WORKER_JOBS.to_string();
        let s = settings(&[("WORKER_MAX_JOBS", max.as_str())]).unwrap();
        assert_eq!(s.worker.max_jobs, MAX_WORKER_JOBS);
    }

    #[test]
    fn debug_output_hides_password() {
        let s = settings(&[("POSTGRES_PASSWORD", "p@ss/word")]).unwrap();
        let rendered = format!("{:?}", s.postgres);
        assert!(!rendered.contains("p@ss/word"));
    }
}
