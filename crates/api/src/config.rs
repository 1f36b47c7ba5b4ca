use std::str::FromStr;
use std::time::Duration;

use evalhub_backend::{
    BackendConfig, BackendKind, ClusterConfig, RetryConfig, ServingConfig, UnknownBackendKind,
};

/// Configuration errors. Raised at startup; the binary refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error(transparent)]
    Backend(#[from] UnknownBackendKind),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable `fmt` output.
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Dispatcher and recovery tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the dispatcher looks for pending jobs without a wake-up.
    pub poll_interval: Duration,
    /// Pending jobs fetched per dispatch cycle.
    pub batch_size: i64,
    /// Submissions in flight at once within a cycle.
    pub concurrency: usize,
    pub retry: RetryConfig,
    /// RUNNING jobs older than this are re-checked against the backend.
    pub running_deadline: Duration,
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 32,
            concurrency: 4,
            retry: RetryConfig::default(),
            running_deadline: Duration::from_secs(6 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. In production,
/// override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background tasks, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// PostgreSQL URL. When unset, jobs are kept in memory.
    pub database_url: Option<String>,
    pub log_format: LogFormat,
    pub engine: EngineConfig,
    pub backend: BackendConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                    |
    /// |-----------------------------|----------------------------|
    /// | `HOST`                      | `0.0.0.0`                  |
    /// | `PORT`                      | `3000`                     |
    /// | `CORS_ORIGINS`              | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `30`                       |
    /// | `DATABASE_URL`              | unset (in-memory store)    |
    /// | `LOG_FORMAT`                | `pretty` (or `json`)       |
    /// | `DISPATCH_POLL_INTERVAL_MS` | `1000`                     |
    /// | `DISPATCH_BATCH_SIZE`       | `32`                       |
    /// | `DISPATCH_CONCURRENCY`      | `4`                        |
    /// | `SUBMIT_MAX_ATTEMPTS`       | `3`                        |
    /// | `SUBMIT_RETRY_INITIAL_MS`   | `500`                      |
    /// | `SUBMIT_RETRY_MAX_MS`       | `10000`                    |
    /// | `RUNNING_DEADLINE_SECS`     | `21600`                    |
    /// | `SWEEP_INTERVAL_SECS`       | `60`                       |
    /// | `BACKEND_KIND`              | `cluster` (or `serving`)   |
    /// | `CLUSTER_URL`               | `http://localhost:8265`    |
    /// | `CLUSTER_ENTRYPOINT`        | `python -m evaluator.run`  |
    /// | `CLUSTER_POLL_INTERVAL_MS`  | `5000`                     |
    /// | `RESULTS_PREFIX`            | `s3://evalhub/jobs`        |
    /// | `SERVING_URL`               | `http://localhost:8000`    |
    /// | `SERVING_TIMEOUT_SECS`      | `600`                      |
    /// | `SERVING_ACCEPT_WINDOW_MS`  | `2000`                     |
    ///
    /// Intervals and timeouts must be non-zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let host = env.string("HOST", "0.0.0.0");
        let port: u16 = env.parse("PORT", 3000, "u16")?;

        let cors_origins: Vec<String> = env
            .string("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env.parse("REQUEST_TIMEOUT_SECS", 30, "u64")?;
        let shutdown_timeout_secs: u64 = env.parse("SHUTDOWN_TIMEOUT_SECS", 30, "u64")?;
        let database_url = env.get("DATABASE_URL").filter(|s| !s.trim().is_empty());

        let log_format = match env.get("LOG_FORMAT") {
            None => LogFormat::Pretty,
            Some(value) => value.parse().map_err(|()| ConfigError::Invalid {
                var: "LOG_FORMAT",
                expected: "log format (pretty|json)",
                value,
            })?,
        };

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            poll_interval: Duration::from_millis(env.positive("DISPATCH_POLL_INTERVAL_MS", 1000)?),
            batch_size: env.parse("DISPATCH_BATCH_SIZE", defaults.batch_size, "i64")?.max(1),
            concurrency: env.parse("DISPATCH_CONCURRENCY", defaults.concurrency, "usize")?.max(1),
            retry: RetryConfig {
                max_attempts: env.parse("SUBMIT_MAX_ATTEMPTS", defaults.retry.max_attempts, "u32")?,
                initial_delay: Duration::from_millis(env.parse("SUBMIT_RETRY_INITIAL_MS", 500, "u64")?),
                max_delay: Duration::from_millis(env.parse("SUBMIT_RETRY_MAX_MS", 10_000, "u64")?),
                ..defaults.retry
            },
            running_deadline: Duration::from_secs(env.parse("RUNNING_DEADLINE_SECS", 21_600, "u64")?),
            sweep_interval: Duration::from_secs(env.positive("SWEEP_INTERVAL_SECS", 60)?),
        };

        let kind: BackendKind = env.string("BACKEND_KIND", "cluster").parse()?;
        let backend = match kind {
            BackendKind::Cluster => {
                let defaults = ClusterConfig::default();
                BackendConfig::Cluster(ClusterConfig {
                    base_url: env.string("CLUSTER_URL", &defaults.base_url),
                    entrypoint: env.string("CLUSTER_ENTRYPOINT", &defaults.entrypoint),
                    poll_interval: Duration::from_millis(env.positive("CLUSTER_POLL_INTERVAL_MS", 5000)?),
                    results_prefix: env.string("RESULTS_PREFIX", &defaults.results_prefix),
                })
            }
            BackendKind::Serving => {
                let defaults = ServingConfig::default();
                BackendConfig::Serving(ServingConfig {
                    base_url: env.string("SERVING_URL", &defaults.base_url),
                    timeout: Duration::from_secs(env.positive("SERVING_TIMEOUT_SECS", 600)?),
                    accept_window: Duration::from_millis(env.positive("SERVING_ACCEPT_WINDOW_MS", 2000)?),
                })
            }
        };

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            database_url,
            log_format,
            engine,
            backend,
        })
    }
}

/// Typed access to a variable source.
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(
        &self,
        var: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(var) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var,
                expected,
                value,
            }),
        }
    }

    /// A `u64` that must be at least 1.
    fn positive(&self, var: &'static str, default: u64) -> Result<u64, ConfigError> {
        const EXPECTED: &str = "positive integer";
        match self.parse(var, default, EXPECTED)? {
            0 => Err(ConfigError::Invalid {
                var,
                expected: EXPECTED,
                value: "0".to_string(),
            }),
            value => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_without_any_variables() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.cors_origins, vec!["http://localhost:5173"]);
        assert!(config.database_url.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.engine.batch_size, 32);
        assert_eq!(config.engine.retry.max_attempts, 3);
        assert_eq!(config.engine.running_deadline, Duration::from_secs(21_600));
        assert_matches!(config.backend, BackendConfig::Cluster(ref c) if c.base_url == "http://localhost:8265");
    }

    #[test]
    fn serving_backend_selection() {
        let config = load(&[
            ("BACKEND_KIND", "serving"),
            ("SERVING_URL", "http://serve:9000"),
            ("SERVING_TIMEOUT_SECS", "120"),
        ])
        .unwrap();
        assert_matches!(
            config.backend,
            BackendConfig::Serving(ref s) if s.base_url == "http://serve:9000" && s.timeout == Duration::from_secs(120)
        );
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = load(&[("CORS_ORIGINS", "http://a.test, http://b.test,,")]).unwrap();
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn invalid_values_are_errors_not_panics() {
        assert_matches!(load(&[("PORT", "eighty")]), Err(ConfigError::Invalid { var: "PORT", .. }));
        assert_matches!(load(&[("LOG_FORMAT", "xml")]), Err(ConfigError::Invalid { var: "LOG_FORMAT", .. }));
        assert_matches!(load(&[("BACKEND_KIND", "lambda")]), Err(ConfigError::Backend(_)));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for var in [
            "DISPATCH_POLL_INTERVAL_MS",
            "SWEEP_INTERVAL_SECS",
            "CLUSTER_POLL_INTERVAL_MS",
        ] {
            assert_matches!(
                load(&[(var, "0")]),
                Err(ConfigError::Invalid { var: v, .. }) if v == var
            );
        }
        assert_matches!(
            load(&[("BACKEND_KIND", "serving"), ("SERVING_ACCEPT_WINDOW_MS", "0")]),
            Err(ConfigError::Invalid { var: "SERVING_ACCEPT_WINDOW_MS", .. })
        );

        let config = load(&[("DISPATCH_POLL_INTERVAL_MS", "1"), ("SWEEP_INTERVAL_SECS", "1")]).unwrap();
        assert_eq!(config.engine.poll_interval, Duration::from_millis(1));
        assert_eq!(config.engine.sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn json_logging_and_database() {
        let config = load(&[
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/evalhub"),
        ])
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/evalhub"));
    }
}
