//! Environment-driven application settings.
//!
//! One immutable snapshot is built at startup and shared behind the app
//! state; nothing mutates it afterwards.

use std::time::Duration;

/// Application settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Deployment environment name ("development", "production", ...).
    pub environment: String,
    /// Comma-separated list of allowed CORS origins.
    pub allowed_origins: String,
    /// Redis-compatible REST endpoint used for caching and admission.
    pub redis_url: Option<String>,
    /// Bearer token for the REST endpoint.
    pub redis_token: String,
    /// Log filter default when `RUST_LOG` is unset.
    pub log_level: String,
    /// Upper bound on solver subprocesses alive at once, across all clients.
    pub max_concurrent_sims: usize,
    /// Hard wall-clock budget for one solver run.
    pub sim_timeout_seconds: u64,
    /// Root directory under which per-run workdirs are created.
    pub nec_workdir: String,
    /// Solver binary name or path.
    pub nec_bin: String,
    /// Master switch for the admission layer.
    pub rate_limit_enabled: bool,
    /// Sliding-window request budget per client address.
    pub rate_limit_per_hour: u64,
    /// Sliding-window length in seconds.
    pub rate_limit_window_seconds: u64,
    /// Concurrent simulation budget per client address.
    pub max_concurrent_per_ip: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Build the settings snapshot from the process environment.
    pub fn from_env() -> Self {
        Self {
            environment: env_or("ENVIRONMENT", "development".to_string()),
            allowed_origins: env_or("ALLOWED_ORIGINS", "http://localhost:5173".to_string()),
            redis_url: std::env::var("REDIS_URL").ok().map(|mut u| {
                while u.ends_with('/') {
                    u.pop();
                }
                u
            }),
            redis_token: env_or("REDIS_TOKEN", String::new()),
            log_level: env_or("LOG_LEVEL", "info".to_string()),
            max_concurrent_sims: env_or("MAX_CONCURRENT_SIMS", 4),
            sim_timeout_seconds: env_or("SIM_TIMEOUT_SECONDS", 180),
            nec_workdir: env_or("NEC_WORKDIR", "/tmp/nec_workdir".to_string()),
            nec_bin: env_or("NEC_BIN", "nec2c".to_string()),
            rate_limit_enabled: env_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_hour: env_or("RATE_LIMIT_PER_HOUR", 30),
            rate_limit_window_seconds: env_or("RATE_LIMIT_WINDOW_SECONDS", 3600),
            max_concurrent_per_ip: env_or("MAX_CONCURRENT_PER_IP", 5),
        }
    }

    /// Allowed CORS origins, split and trimmed.
    pub fn cors_origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }

    pub fn is_dev(&self) -> bool {
        self.environment == "development"
    }

    pub fn sim_timeout(&self) -> Duration {
        Duration::from_secs(self.sim_timeout_seconds)
    }

    /// Resolve the solver binary against `PATH` (or directly if it contains
    /// a path separator). Used by the health endpoint.
    pub fn solver_available(&self) -> bool {
        if self.nec_bin.contains('/') {
            return std::path::Path::new(&self.nec_bin).is_file();
        }
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path).any(|dir| dir.join(&self.nec_bin).is_file())
    }
}
