use std::path::PathBuf;
use std::time::Duration;

use simjob_queue::QueueConfig;

use crate::worker::WorkerSettings;

/// Where result artifacts are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Local { path: PathBuf },
    S3 { bucket: String, endpoint: Option<String> },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("HEARTBEAT_INTERVAL_SECS ({heartbeat:?}) must be shorter than VISIBILITY_TIMEOUT_SECS ({visibility:?})")]
    HeartbeatTooSlow {
        heartbeat: Duration,
        visibility: Duration,
    },

    #[error("MAX_ATTEMPTS must be at least 1")]
    NoAttempts,

    #[error("MAX_RECEIVE_COUNT must be at least 1")]
    NoDeliveries,

    #[error("HEARTBEAT_INTERVAL_SECS must be greater than zero")]
    ZeroHeartbeat,

    /// The queue would dead-letter a message before the claim that fails
    /// the job, leaving the record `running`.
    #[error("MAX_RECEIVE_COUNT ({max_receive_count}) must exceed MAX_ATTEMPTS ({max_attempts})")]
    DeliveriesBelowAttempts {
        max_receive_count: u32,
        max_attempts: i32,
    },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Postgres URL. `None` runs against in-memory store and queue.
    pub database_url: Option<String>,
    /// Concurrent execution slots in this process.
    pub slots: usize,
    /// Claims allowed per job before it is failed as a poison message.
    pub max_attempts: i32,
    pub visibility_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Long-poll wait per receive call.
    pub receive_wait: Duration,
    /// Deliveries before the queue dead-letters a message.
    pub max_receive_count: u32,
    pub storage: StorageConfig,
    /// How long in-flight attempts get to reach a checkpoint on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            slots: 2,
            max_attempts: 3,
            visibility_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            receive_wait: Duration::from_secs(20),
            max_receive_count: 5,
            storage: StorageConfig::Local {
                path: PathBuf::from("./data/results"),
            },
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default          |
    /// |---------------------------|------------------|
    /// | `DATABASE_URL`            | unset (memory)   |
    /// | `WORKER_SLOTS`            | `2`              |
    /// | `MAX_ATTEMPTS`            | `3`              |
    /// | `VISIBILITY_TIMEOUT_SECS` | `30`             |
    /// | `HEARTBEAT_INTERVAL_SECS` | `10`             |
    /// | `RECEIVE_WAIT_SECS`       | `20`             |
    /// | `MAX_RECEIVE_COUNT`       | `5`              |
    /// | `STORAGE_BACKEND`         | `local`          |
    /// | `STORAGE_LOCAL_PATH`      | `./data/results` |
    /// | `S3_BUCKET`               | required for s3  |
    /// | `S3_ENDPOINT`             | unset            |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `30`             |
    ///
    /// Panics on malformed values; misconfiguration should stop startup.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.is_empty());

        let slots: usize = env_or("WORKER_SLOTS", "2")
            .parse()
            .expect("WORKER_SLOTS must be a valid usize");

        let max_attempts: i32 = env_or("MAX_ATTEMPTS", "3")
            .parse()
            .expect("MAX_ATTEMPTS must be a valid i32");

        let visibility_timeout_secs: u64 = env_or("VISIBILITY_TIMEOUT_SECS", "30")
            .parse()
            .expect("VISIBILITY_TIMEOUT_SECS must be a valid u64");

        let heartbeat_interval_secs: u64 = env_or("HEARTBEAT_INTERVAL_SECS", "10")
            .parse()
            .expect("HEARTBEAT_INTERVAL_SECS must be a valid u64");

        let receive_wait_secs: u64 = env_or("RECEIVE_WAIT_SECS", "20")
            .parse()
            .expect("RECEIVE_WAIT_SECS must be a valid u64");

        let max_receive_count: u32 = env_or("MAX_RECEIVE_COUNT", "5")
            .parse()
            .expect("MAX_RECEIVE_COUNT must be a valid u32");

        let shutdown_timeout_secs: u64 = env_or("SHUTDOWN_TIMEOUT_SECS", "30")
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let storage = match env_or("STORAGE_BACKEND", "local").as_str() {
            "local" => StorageConfig::Local {
                path: PathBuf::from(env_or("STORAGE_LOCAL_PATH", "./data/results")),
            },
            "s3" => StorageConfig::S3 {
                bucket: std::env::var("S3_BUCKET")
                    .expect("S3_BUCKET must be set when STORAGE_BACKEND=s3"),
                endpoint: std::env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),
            },
            other => panic!("STORAGE_BACKEND must be 'local' or 's3', got '{other}'"),
        };

        Self {
            database_url,
            slots,
            max_attempts,
            visibility_timeout: Duration::from_secs(visibility_timeout_secs),
            heartbeat_interval: Duration::from_secs(heartbeat_interval_secs),
            receive_wait: Duration::from_secs(receive_wait_secs),
            max_receive_count,
            storage,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
        }
    }

    /// Reject settings under which a healthy attempt could lose its message.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::NoAttempts);
        }
        if self.max_receive_count == 0 {
            return Err(ConfigError::NoDeliveries);
        }
        // One delivery past the last attempt is needed to record the failure.
        if i64::from(self.max_receive_count) <= i64::from(self.max_attempts) {
            return Err(ConfigError::DeliveriesBelowAttempts {
                max_receive_count: self.max_receive_count,
                max_attempts: self.max_attempts,
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroHeartbeat);
        }
        if self.heartbeat_interval >= self.visibility_timeout {
            return Err(ConfigError::HeartbeatTooSlow {
                heartbeat: self.heartbeat_interval,
                visibility: self.visibility_timeout,
            });
        }
        Ok(())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            visibility_timeout: self.visibility_timeout,
            max_receive_count: self.max_receive_count,
        }
    }

    pub fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            max_attempts: self.max_attempts,
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}
