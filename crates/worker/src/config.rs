use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use looks_core::error::CoreError;
use looks_core::scheduling::{BatchBounds, DEFAULT_MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use looks_pipeline::storage::StorageConfig;

/// Worker configuration loaded once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Apply `db/migrations` before starting (development databases).
    pub run_migrations: bool,
    pub comfyui_api_base: String,
    pub worker_id: String,
    /// Only jobs whose `preferred_backend` matches are fetched.
    pub backend_affinity: String,
    pub poll_interval: Duration,
    pub batch_bounds: BatchBounds,
    pub job_timeout: Duration,
    pub render_poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub startup_timeout: Duration,
    pub startup_poll_interval: Duration,
    pub error_cooldown: Duration,
    pub cost_per_job_usd: f64,
    pub storage: StorageConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid batch bounds: {0}")]
    BatchBounds(#[from] CoreError),
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                         | Default                   |
    /// |---------------------------------|---------------------------|
    /// | `DATABASE_URL`                  | required                  |
    /// | `RUN_MIGRATIONS`                | `false` (`1`/`yes`/`on` also enable) |
    /// | `COMFYUI_API_BASE`              | `http://127.0.0.1:8188`   |
    /// | `WORKER_ID`                     | `vast-worker-{unix_secs}` |
    /// | `BACKEND_AFFINITY`              | `vast`                    |
    /// | `POLL_INTERVAL_SECONDS`         | `5`                       |
    /// | `MIN_BATCH_SIZE`                | `1`                       |
    /// | `MAX_BATCH_SIZE`                | `12`                      |
    /// | `JOB_TIMEOUT_SECONDS`           | `300`                     |
    /// | `RENDER_POLL_INTERVAL_SECONDS`  | `3`                       |
    /// | `HEARTBEAT_INTERVAL_SECONDS`    | `30`                      |
    /// | `STARTUP_TIMEOUT_SECONDS`       | `900`                     |
    /// | `STARTUP_POLL_INTERVAL_SECONDS` | `10`                      |
    /// | `ERROR_COOLDOWN_SECONDS`        | `10`                      |
    /// | `COST_PER_JOB_USD`              | `0.005`                   |
    /// | `STORAGE_ENDPOINT`              | required                  |
    /// | `STORAGE_REGION`                | required                  |
    /// | `STORAGE_ACCESS_KEY_ID`         | required                  |
    /// | `STORAGE_SECRET_ACCESS_KEY`     | required                  |
    /// | `STORAGE_BUCKET`                | `avatars`                 |
    /// | `STORAGE_PUBLIC_BASE_URL`       | required                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let min_batch = env.parse("MIN_BATCH_SIZE", MIN_BATCH_SIZE)?;
        let max_batch = env.parse("MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE)?;
        let batch_bounds = BatchBounds::new(min_batch, max_batch)?;

        let cost_per_job_usd: f64 = env.parse("COST_PER_JOB_USD", 0.005)?;
        if !cost_per_job_usd.is_finite() || cost_per_job_usd < 0.0 {
            return Err(ConfigError::Invalid {
                var: "COST_PER_JOB_USD",
                value: cost_per_job_usd.to_string(),
                reason: "must be a non-negative number".into(),
            });
        }

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            run_migrations: env.flag("RUN_MIGRATIONS", false)?,
            comfyui_api_base: env.or("COMFYUI_API_BASE", "http://127.0.0.1:8188"),
            worker_id: env
                .optional("WORKER_ID")
                .unwrap_or_else(default_worker_id),
            backend_affinity: env.or("BACKEND_AFFINITY", "vast"),
            poll_interval: env.seconds("POLL_INTERVAL_SECONDS", 5)?,
            batch_bounds,
            job_timeout: env.seconds("JOB_TIMEOUT_SECONDS", 300)?,
            render_poll_interval: env.seconds("RENDER_POLL_INTERVAL_SECONDS", 3)?,
            heartbeat_interval: env.seconds("HEARTBEAT_INTERVAL_SECONDS", 30)?,
            startup_timeout: env.seconds("STARTUP_TIMEOUT_SECONDS", 900)?,
            startup_poll_interval: env.seconds("STARTUP_POLL_INTERVAL_SECONDS", 10)?,
            error_cooldown: env.seconds("ERROR_COOLDOWN_SECONDS", 10)?,
            cost_per_job_usd,
            storage: StorageConfig {
                endpoint: env.required("STORAGE_ENDPOINT")?,
                region: env.required("STORAGE_REGION")?,
                access_key_id: env.required("STORAGE_ACCESS_KEY_ID")?,
                secret_access_key: env.required("STORAGE_SECRET_ACCESS_KEY")?,
                bucket: env.or("STORAGE_BUCKET", "avatars"),
                public_base_url: env.required("STORAGE_PUBLIC_BASE_URL")?,
            },
        })
    }
}

fn default_worker_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("vast-worker-{secs}")
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Set and non-blank.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var: key,
                reason: e.to_string(),
                value,
            }),
        }
    }

    /// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, case-insensitive.
    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.optional(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var: key,
                value,
                reason: "expected true or false".into(),
            }),
        }
    }

    /// A strictly positive number of seconds.
    fn seconds(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        let secs: u64 = self.parse(key, default)?;
        if secs == 0 {
            return Err(ConfigError::Invalid {
                var: key,
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/looks"),
            ("STORAGE_ENDPOINT", "https://proj.supabase.co/storage/v1/s3"),
            ("STORAGE_REGION", "eu-central-1"),
            ("STORAGE_ACCESS_KEY_ID", "key"),
            ("STORAGE_SECRET_ACCESS_KEY", "secret"),
            (
                "STORAGE_PUBLIC_BASE_URL",
                "https://proj.supabase.co/storage/v1/object/public",
            ),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<WorkerConfig, ConfigError> {
        WorkerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let config = load(&base()).unwrap();
        assert_eq!(config.comfyui_api_base, "http://127.0.0.1:8188");
        assert!(config.worker_id.starts_with("vast-worker-"));
        assert_eq!(config.backend_affinity, "vast");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_bounds.min(), 1);
        assert_eq!(config.batch_bounds.max(), 12);
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.render_poll_interval, Duration::from_secs(3));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.startup_timeout, Duration::from_secs(900));
        assert_eq!(config.startup_poll_interval, Duration::from_secs(10));
        assert_eq!(config.error_cooldown, Duration::from_secs(10));
        assert_eq!(config.cost_per_job_usd, 0.005);
        assert_eq!(config.storage.bucket, "avatars");
        assert!(!config.run_migrations);
    }

    #[test]
    fn overrides_are_read() {
        let mut vars = base();
        vars.insert("WORKER_ID", "gpu-box-7");
        vars.insert("MAX_BATCH_SIZE", "4");
        vars.insert("JOB_TIMEOUT_SECONDS", "120");
        let config = load(&vars).unwrap();
        assert_eq!(config.worker_id, "gpu-box-7");
        assert_eq!(config.batch_bounds.max(), 4);
        assert_eq!(config.job_timeout, Duration::from_secs(120));
    }

    #[test]
    fn missing_database_url() {
        let mut vars = base();
        vars.remove("DATABASE_URL");
        assert_matches!(load(&vars), Err(ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn blank_required_value_counts_as_missing() {
        let mut vars = base();
        vars.insert("STORAGE_PUBLIC_BASE_URL", "  ");
        assert_matches!(load(&vars), Err(ConfigError::Missing("STORAGE_PUBLIC_BASE_URL")));
    }

    #[test]
    fn unparsable_number() {
        let mut vars = base();
        vars.insert("POLL_INTERVAL_SECONDS", "five");
        assert_matches!(
            load(&vars),
            Err(ConfigError::Invalid { var: "POLL_INTERVAL_SECONDS", .. })
        );
    }

    #[test]
    fn zero_interval_rejected() {
        let mut vars = base();
        vars.insert("RENDER_POLL_INTERVAL_SECONDS", "0");
        assert_matches!(
            load(&vars),
            Err(ConfigError::Invalid { var: "RENDER_POLL_INTERVAL_SECONDS", .. })
        );
    }

    #[test]
    fn max_below_min_rejected() {
        let mut vars = base();
        vars.insert("MIN_BATCH_SIZE", "5");
        vars.insert("MAX_BATCH_SIZE", "2");
        assert_matches!(load(&vars), Err(ConfigError::BatchBounds(_)));
    }

    #[test]
    fn min_below_one_rejected() {
        let mut vars = base();
        vars.insert("MIN_BATCH_SIZE", "0");
        assert_matches!(load(&vars), Err(ConfigError::BatchBounds(_)));
    }

    #[test]
    fn zero_cooldown_rejected() {
        let mut vars = base();
        vars.insert("ERROR_COOLDOWN_SECONDS", "0");
        assert_matches!(
            load(&vars),
            Err(ConfigError::Invalid { var: "ERROR_COOLDOWN_SECONDS", .. })
        );
    }

    #[test]
    fn migration_flag_accepts_common_spellings() {
        for (raw, expected) in [("1", true), ("YES", true), ("on", true), ("0", false), ("no", false)] {
            let mut vars = base();
            vars.insert("RUN_MIGRATIONS", raw);
            assert_eq!(load(&vars).unwrap().run_migrations, expected, "{raw}");
        }
    }

    #[test]
    fn migration_flag_rejects_garbage() {
        let mut vars = base();
        vars.insert("RUN_MIGRATIONS", "maybe");
        assert_matches!(load(&vars), Err(ConfigError::Invalid { var: "RUN_MIGRATIONS", .. }));
    }

    #[test]
    fn negative_cost_rejected() {
        let mut vars = base();
        vars.insert("COST_PER_JOB_USD", "-1");
        assert_matches!(load(&vars), Err(ConfigError::Invalid { var: "COST_PER_JOB_USD", .. }));
    }
}
