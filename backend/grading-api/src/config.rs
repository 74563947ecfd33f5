use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub bind_addr: String,
    /// Base URL of the AI evaluation service. `None` leaves the evaluator
    /// unconfigured and every writing/speaking evaluation fails fast.
    pub ai_service_url: Option<String>,
    pub ai_timeout_secs: u64,
    pub user_service_url: String,
    pub user_service_timeout_secs: u64,
    pub internal_api_key: String,
    pub object_storage: Option<ObjectStorageSettings>,
    pub worker_concurrency: usize,
    pub sync_replay_interval_secs: u64,
    pub sync_replay_batch_size: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "ielts".to_string(),
            bind_addr: "0.0.0.0:8081".to_string(),
            ai_service_url: None,
            ai_timeout_secs: 120,
            user_service_url: "http://localhost:8082".to_string(),
            user_service_timeout_secs: 10,
            internal_api_key: String::new(),
            object_storage: None,
            worker_concurrency: 16,
            sync_replay_interval_secs: 60,
            sync_replay_batch_size: 50,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let string = |key: &str, var: &str, fallback: &str| -> String {
            settings
                .get_string(key)
                .or_else(|_| env::var(var))
                .unwrap_or_else(|_| fallback.to_string())
        };
        let number = |key: &str, var: &str, fallback: i64| -> Result<i64, config::ConfigError> {
            match settings.get_int(key) {
                Ok(v) => Ok(v),
                Err(_) => match env::var(var) {
                    Ok(raw) => raw.parse::<i64>().map_err(|e| {
                        config::ConfigError::Message(format!("{var} must be an integer: {e}"))
                    }),
                    Err(_) => Ok(fallback),
                },
            }
        };

        let internal_api_key = string("user_service.internal_api_key", "INTERNAL_API_KEY", "");
        if internal_api_key.is_empty() {
            if app_env == "prod" {
                return Err(config::ConfigError::Message(
                    "INTERNAL_API_KEY must be set in production".to_string(),
                ));
            }
            eprintln!("WARNING: INTERNAL_API_KEY is empty (dev mode only!)");
        }

        let ai_service_url = settings
            .get_string("ai_service.url")
            .or_else(|_| env::var("AI_SERVICE_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());

        let object_storage = match settings.get_string("object_storage.bucket") {
            Ok(bucket) => Some(ObjectStorageSettings {
                bucket,
                region: string("object_storage.region", "S3_REGION", "us-east-1"),
                endpoint: settings
                    .get_string("object_storage.endpoint")
                    .or_else(|_| env::var("S3_ENDPOINT"))
                    .ok(),
                access_key: string("object_storage.access_key", "S3_ACCESS_KEY", ""),
                secret_key: string("object_storage.secret_key", "S3_SECRET_KEY", ""),
            }),
            Err(_) => env::var("S3_BUCKET").ok().map(|bucket| ObjectStorageSettings {
                bucket,
                region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint: env::var("S3_ENDPOINT").ok(),
                access_key: env::var("S3_ACCESS_KEY").unwrap_or_default(),
                secret_key: env::var("S3_SECRET_KEY").unwrap_or_default(),
            }),
        };

        let worker_concurrency = number(
            "workers.concurrency",
            "WORKER_CONCURRENCY",
            defaults.worker_concurrency as i64,
        )?;
        if worker_concurrency <= 0 {
            return Err(config::ConfigError::Message(
                "worker concurrency must be positive".to_string(),
            ));
        }

        Ok(Config {
            mongo_uri: string("database.mongo_uri", "MONGO_URI", &defaults.mongo_uri),
            redis_uri: string("redis.uri", "REDIS_URI", &defaults.redis_uri),
            mongo_database: string(
                "database.mongo_database",
                "MONGO_DATABASE",
                &defaults.mongo_database,
            ),
            bind_addr: string("server.bind_addr", "BIND_ADDR", &defaults.bind_addr),
            ai_service_url,
            ai_timeout_secs: number(
                "ai_service.timeout_secs",
                "AI_SERVICE_TIMEOUT_SECS",
                defaults.ai_timeout_secs as i64,
            )?
            .max(1) as u64,
            user_service_url: string(
                "user_service.url",
                "USER_SERVICE_URL",
                &defaults.user_service_url,
            ),
            user_service_timeout_secs: number(
                "user_service.timeout_secs",
                "USER_SERVICE_TIMEOUT_SECS",
                defaults.user_service_timeout_secs as i64,
            )?
            .max(1) as u64,
            internal_api_key,
            object_storage,
            worker_concurrency: worker_concurrency as usize,
            sync_replay_interval_secs: number(
                "workers.sync_replay_interval_secs",
                "SYNC_REPLAY_INTERVAL_SECS",
                defaults.sync_replay_interval_secs as i64,
            )?
            .max(1) as u64,
            sync_replay_batch_size: number(
                "workers.sync_replay_batch_size",
                "SYNC_REPLAY_BATCH_SIZE",
                defaults.sync_replay_batch_size,
            )?
            .max(1),
        })
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }

    pub fn user_service_timeout(&self) -> Duration {
        Duration::from_secs(self.user_service_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_leave_ai_unconfigured() {
        let config = Config::default();
        assert!(config.ai_service_url.is_none());
        assert_eq!(config.worker_concurrency, 16);
        assert_eq!(config.ai_timeout(), Duration::from_secs(120));
        assert_eq!(config.user_service_timeout(), Duration::from_secs(10));
    }

    #[test]
    #[serial_test::serial]
    fn load_reads_plain_environment() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("APP_ENV", "test");
        std::env::set_var("AI_SERVICE_URL", "http://ai.internal:9000");
        std::env::set_var("WORKER_CONCURRENCY", "4");
        std::env::set_var("INTERNAL_API_KEY", "secret");

        let config = Config::load().unwrap();
        assert_eq!(
            config.ai_service_url.as_deref(),
            Some("http://ai.internal:9000")
        );
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.internal_api_key, "secret");

        for var in [
            "SKIP_ROOT_ENV",
            "APP_ENV",
            "AI_SERVICE_URL",
            "WORKER_CONCURRENCY",
            "INTERNAL_API_KEY",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial_test::serial]
    fn rejects_zero_concurrency() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("APP_ENV", "test");
        std::env::set_var("WORKER_CONCURRENCY", "0");

        assert!(Config::load().is_err());

        for var in ["SKIP_ROOT_ENV", "APP_ENV", "WORKER_CONCURRENCY"] {
            std::env::remove_var(var);
        }
    }
}
