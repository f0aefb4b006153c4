//! Configuration for the queue, the worker role, and the clock role.
//!
//! Everything is passed explicitly at construction; nothing is read from the
//! environment here (the CLI maps flags and env vars onto these structs).
//! Durations are serialized as milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: &'static str) -> Self {
        ConfigError::Invalid { field, reason }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Prefix of every store key of this queue.
    pub name: String,
    /// Sleep between store polls while `dequeue` waits for work.
    #[serde(with = "millis")]
    pub poll_step: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            poll_step: Duration::from_millis(50),
        }
    }
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("queue.name", "must not be empty"));
        }
        if self.poll_step.is_zero() {
            return Err(ConfigError::invalid("queue.poll_step", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of execution slots. With a pooled store this should not exceed
    /// the pool size; a single connection means `1`.
    pub max_concurrent_jobs: usize,
    /// Base sleep of an idle slot after finding the queue empty (jittered ±50%).
    #[serde(with = "millis")]
    pub average_polling_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            average_polling_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn new(max_concurrent_jobs: usize, average_polling_interval: Duration) -> Self {
        Self {
            max_concurrent_jobs,
            average_polling_interval,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::invalid(
                "worker.max_concurrent_jobs",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(with = "millis")]
    pub interval: Duration,
    /// Requeues allowed per envelope; the next expiry drops it.
    pub max_retry_attempts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_retry_attempts: 5,
        }
    }
}

impl MonitorConfig {
    pub fn new(interval: Duration, max_retry_attempts: u32) -> Self {
        Self {
            interval,
            max_retry_attempts,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid("monitor.interval", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(with = "millis")]
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

impl SchedulerConfig {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid("scheduler.interval", "must be positive"));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(QueueConfig::default().validate().is_ok());
        assert!(WorkerConfig::default().validate().is_ok());
        assert!(MonitorConfig::default().validate().is_ok());
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn worker_needs_at_least_one_slot() {
        let cfg = WorkerConfig::new(0, Duration::from_millis(100));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_jobs"));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        assert!(MonitorConfig::new(Duration::ZERO, 3).validate().is_err());
        assert!(SchedulerConfig::new(Duration::ZERO).validate().is_err());
        let queue = QueueConfig {
            poll_step: Duration::ZERO,
            ..QueueConfig::default()
        };
        assert!(queue.validate().is_err());
    }

    #[test]
    fn empty_queue_name_is_rejected() {
        assert!(QueueConfig::new("").validate().is_err());
        assert!(QueueConfig::new("mail").validate().is_ok());
    }

    #[test]
    fn durations_serialize_as_millis() {
        let cfg = MonitorConfig::new(Duration::from_millis(2500), 4);
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json, serde_json::json!({ "interval": 2500, "max_retry_attempts": 4 }));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: WorkerConfig = serde_json::from_str(r#"{ "max_concurrent_jobs": 8 }"#).unwrap();
        assert_eq!(cfg.max_concurrent_jobs, 8);
        assert_eq!(cfg.average_polling_interval, Duration::from_secs(1));
    }
}
