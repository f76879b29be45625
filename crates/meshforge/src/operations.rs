//! Operation tracking for detached generation jobs.
//!
//! Tools return an operation id immediately; the job task records its
//! progress here and callers poll for it. Each operation keeps at most
//! [`EVENT_CAP`] events, dropping the oldest first.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ForgeError;

pub type OperationId = u64;

pub const EVENT_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Started,
    Processing,
    Waiting,
    Completed,
    Error,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Started => "STARTED",
            OperationStatus::Processing => "PROCESSING",
            OperationStatus::Waiting => "WAITING",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Error)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEvent {
    pub timestamp: DateTime<Utc>,
    pub status: OperationStatus,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub job_key: String,
    /// Status of the most recent event.
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub events: VecDeque<OperationEvent>,
    /// Final output description, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Lightweight view for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSummary {
    pub id: OperationId,
    pub job_key: String,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub event_count: usize,
    pub last_details: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Concurrent map of operations keyed by id.
#[derive(Debug)]
pub struct OperationTracker {
    operations: DashMap<OperationId, Operation>,
    next_id: AtomicU64,
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationTracker {
    pub fn new() -> Self {
        Self {
            operations: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create an operation and record its STARTED event.
    pub fn start(&self, job_key: impl Into<String>) -> OperationId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let job_key = job_key.into();
        let now = Utc::now();

        let mut events = VecDeque::with_capacity(8);
        events.push_back(OperationEvent {
            timestamp: now,
            status: OperationStatus::Started,
            details: format!("{job_key} started"),
        });

        self.operations.insert(
            id,
            Operation {
                id,
                job_key: job_key.clone(),
                status: OperationStatus::Started,
                started_at: now,
                events,
                result: None,
            },
        );

        tracing::info!(operation.id = id, operation.job = %job_key, "Operation started");
        id
    }

    /// Append an event, evicting the oldest beyond [`EVENT_CAP`].
    pub fn record(
        &self,
        id: OperationId,
        status: OperationStatus,
        details: impl Into<String>,
    ) -> Result<(), ForgeError> {
        let mut op = self
            .operations
            .get_mut(&id)
            .ok_or_else(|| ForgeError::NotFound(format!("operation {id}")))?;

        let details = details.into();
        match status {
            OperationStatus::Error => {
                tracing::error!(
                    operation.id = id,
                    operation.job = %op.job_key,
                    error = %details,
                    "Operation failed"
                )
            }
            OperationStatus::Completed => {
                tracing::info!(
                    operation.id = id,
                    operation.job = %op.job_key,
                    "Operation completed"
                )
            }
            _ => tracing::debug!(operation.id = id, %status, %details, "Operation progress"),
        }

        op.status = status;
        op.events.push_back(OperationEvent {
            timestamp: Utc::now(),
            status,
            details,
        });
        while op.events.len() > EVENT_CAP {
            op.events.pop_front();
        }
        Ok(())
    }

    /// Attach the final output description to an operation.
    pub fn set_result(&self, id: OperationId, result: serde_json::Value) -> Result<(), ForgeError> {
        let mut op = self
            .operations
            .get_mut(&id)
            .ok_or_else(|| ForgeError::NotFound(format!("operation {id}")))?;
        op.result = Some(result);
        Ok(())
    }

    /// Snapshot of one operation.
    pub fn get(&self, id: OperationId) -> Option<Operation> {
        self.operations.get(&id).map(|op| op.clone())
    }

    /// Summaries of every operation, sorted by id.
    pub fn list(&self) -> Vec<OperationSummary> {
        let mut summaries: Vec<_> = self
            .operations
            .iter()
            .map(|op| OperationSummary {
                id: op.id,
                job_key: op.job_key.clone(),
                status: op.status,
                started_at: op.started_at,
                event_count: op.events.len(),
                last_details: op.events.back().map(|e| e.details.clone()),
            })
            .collect();
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    pub fn stats(&self) -> TrackerStats {
        let mut stats = TrackerStats::default();
        for op in self.operations.iter() {
            stats.total += 1;
            match op.status {
                OperationStatus::Completed => stats.completed += 1,
                OperationStatus::Error => stats.failed += 1,
                _ => stats.active += 1,
            }
        }
        stats
    }
}
