//! Outcome of a supervised run

use crate::core::{Result, WorkError};
use crate::pool::{WorkerState, WorkerStatsSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything a [`Supervisor`](super::Supervisor) run produced
///
/// Counts always satisfy `succeeded + failed + abandoned == produced`.
#[derive(Debug)]
pub struct Report<R> {
    /// Successful outputs ordered by sequence number
    pub outputs: Vec<(u64, R)>,
    /// The failure that ended the run, if any
    pub failure: Option<WorkError>,
    /// Failures of items already running when the run was cancelled
    pub secondary_failures: Vec<WorkError>,
    /// Items the producer put into the queue
    pub produced: u64,
    /// Items whose handler succeeded
    pub succeeded: u64,
    /// Items whose handler failed or panicked
    pub failed: u64,
    /// Items accepted into the queue but never started
    pub abandoned: u64,
    /// Terminal state of every worker
    pub worker_states: Vec<WorkerState>,
    /// Final statistics of every worker
    pub worker_stats: Vec<WorkerStatsSnapshot>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished draining
    pub finished_at: DateTime<Utc>,
}

impl<R> Report<R> {
    /// Whether the run finished without a failure
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Outputs in sequence order, without their sequence numbers
    pub fn values(&self) -> impl Iterator<Item = &R> {
        self.outputs.iter().map(|(_, value)| value)
    }

    /// Convert into the outputs, or the failure that ended the run
    pub fn into_result(self) -> Result<Vec<R>> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self.outputs.into_iter().map(|(_, value)| value).collect()),
        }
    }

    /// Wall-clock duration of the run in milliseconds
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Serializable summary without the outputs
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            produced: self.produced,
            succeeded: self.succeeded,
            failed: self.failed,
            abandoned: self.abandoned,
            failure: self.failure.as_ref().map(ToString::to_string),
            failed_sequence: self.failure.as_ref().and_then(WorkError::sequence),
            secondary_failures: self
                .secondary_failures
                .iter()
                .map(ToString::to_string)
                .collect(),
            worker_states: self.worker_states.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            elapsed_ms: self.elapsed_ms(),
        }
    }
}

/// Counts and failure messages of a run, suitable for logging as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Items produced
    pub produced: u64,
    /// Items that succeeded
    pub succeeded: u64,
    /// Items that failed
    pub failed: u64,
    /// Items never started
    pub abandoned: u64,
    /// Message of the failure that ended the run
    pub failure: Option<String>,
    /// Sequence number of the item behind that failure
    pub failed_sequence: Option<u64>,
    /// Messages of later failures
    pub secondary_failures: Vec<String>,
    /// Terminal worker states
    pub worker_states: Vec<WorkerState>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub elapsed_ms: i64,
}

impl ReportSummary {
    /// Render as a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
