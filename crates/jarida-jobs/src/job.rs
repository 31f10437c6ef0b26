//! Re-enrichment job record and its state machine.
//!
//! queued → running → succeeded
//!                  → queued (transient failure, attempts remaining)
//!                  → failed (terminal error or attempts exhausted)
//! Finished jobs are retained for a bounded window, then expired.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use jarida_common::JaridaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentJob {
    pub id:          Uuid,
    /// The tender record to re-enrich. Re-read from the store at execution
    /// time; the job carries no snapshot of it.
    pub tender_id:   Uuid,
    pub state:       JobState,
    pub attempts:    u32,
    pub last_error:  Option<String>,
    /// Stable class label of the last error (`transient`, `persist`, ...).
    pub error_class: Option<&'static str>,
    pub created_at:  DateTime<Utc>,
    pub updated_at:  DateTime<Utc>,
}

impl EnrichmentJob {
    pub fn new(tender_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tender_id,
            state: JobState::Queued,
            attempts: 0,
            last_error: None,
            error_class: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start_attempt(&mut self) {
        self.state = JobState::Running;
        self.attempts += 1;
        self.updated_at = Utc::now();
    }

    pub fn succeed(&mut self) {
        self.state = JobState::Succeeded;
        self.updated_at = Utc::now();
    }

    /// Record a failure. Returns true when the job goes back to the queue
    /// (transient error with attempts remaining).
    pub fn fail(&mut self, error: &JaridaError, max_attempts: u32) -> bool {
        self.last_error = Some(error.to_string());
        self.error_class = Some(error.class_label());
        self.updated_at = Utc::now();

        if error.is_transient() && self.attempts < max_attempts {
            self.state = JobState::Queued;
            true
        } else {
            self.state = JobState::Failed;
            false
        }
    }
}
