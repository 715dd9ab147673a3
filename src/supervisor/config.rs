//! Supervisor configuration

use crate::core::{Result, WorkError};
use crate::pool::WorkerPoolConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`Supervisor`](super::Supervisor) run
///
/// ```rust
/// use rust_work_queue::SupervisorConfig;
/// use std::time::Duration;
///
/// let config = SupervisorConfig::new(5, 3)
///     .with_deadline(Duration::from_secs(2))
///     .with_thread_name_prefix("consumer");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Queue capacity (must be at least 1)
    pub capacity: usize,
    /// Number of consumer threads (must be at least 1)
    pub workers: usize,
    /// Thread name prefix for consumers; the producer thread is
    /// `{prefix}-producer`
    pub thread_name_prefix: String,
    /// Optional deadline for the whole run
    pub deadline: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            workers: 5,
            thread_name_prefix: "worker".to_string(),
            deadline: None,
        }
    }
}

impl SupervisorConfig {
    /// Create a configuration with the given queue capacity and worker count
    #[must_use]
    pub fn new(capacity: usize, workers: usize) -> Self {
        Self {
            capacity,
            workers,
            ..Default::default()
        }
    }

    /// Set queue capacity
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set number of workers
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set thread name prefix
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Cancel the run if it has not finished after `deadline`
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    ///
    /// ```rust
    /// use rust_work_queue::SupervisorConfig;
    ///
    /// let config = SupervisorConfig::from_json(r#"{"capacity": 3, "workers": 2}"#).unwrap();
    /// assert_eq!(config.capacity, 3);
    /// assert_eq!(config.thread_name_prefix, "worker");
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(WorkError::capacity_misuse(
                "capacity",
                "Queue capacity must be at least 1",
            ));
        }
        self.pool_config().validate()
    }

    /// Configuration of the worker pool this run starts
    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.workers).with_thread_name_prefix(&self.thread_name_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(SupervisorConfig::new(1, 1).validate().is_ok());
        assert!(matches!(
            SupervisorConfig::new(0, 1).validate(),
            Err(WorkError::CapacityMisuse { ref parameter, .. }) if parameter == "capacity"
        ));
        assert!(matches!(
            SupervisorConfig::new(1, 0).validate(),
            Err(WorkError::CapacityMisuse { ref parameter, .. }) if parameter == "workers"
        ));
    }

    #[test]
    fn test_json_round_trip_with_deadline() {
        let config = SupervisorConfig::new(3, 2).with_deadline(Duration::from_millis(1500));
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(SupervisorConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(SupervisorConfig::from_json(r#"{"capacity": 0}"#).is_err());
        assert!(matches!(
            SupervisorConfig::from_json("not json"),
            Err(WorkError::Serialization(_))
        ));
    }
}
