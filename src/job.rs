//! Conversion job model and state transitions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// One convert request being handled on a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    pub job_id: String,
    pub connection_id: String,
    pub filename: String,
    pub status: JobState,
    /// Whether the job reached `Succeeded` before cleanup.
    pub succeeded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Lifecycle of a conversion job.
///
/// ```text
/// Created -> BinaryLocated -> InputWritten -> Converting -> Succeeded | FailedConversion
///        \-> FailBinaryMissing
/// any -> CleanedUp
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    BinaryLocated,
    FailBinaryMissing,
    InputWritten,
    Converting,
    Succeeded,
    FailedConversion,
    CleanedUp,
}

impl JobState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (CleanedUp, _) => false,
            (_, CleanedUp) => true,
            (Created, BinaryLocated) | (Created, FailBinaryMissing) => true,
            (BinaryLocated, InputWritten) => true,
            (InputWritten, Converting) => true,
            (Converting, Succeeded) | (Converting, FailedConversion) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::CleanedUp)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Created => "created",
            JobState::BinaryLocated => "binary_located",
            JobState::FailBinaryMissing => "fail_binary_missing",
            JobState::InputWritten => "input_written",
            JobState::Converting => "converting",
            JobState::Succeeded => "succeeded",
            JobState::FailedConversion => "failed_conversion",
            JobState::CleanedUp => "cleaned_up",
        };
        f.write_str(s)
    }
}

impl ConversionJob {
    pub fn new(connection_id: impl Into<String>, filename: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            connection_id: connection_id.into(),
            filename: filename.into(),
            status: JobState::Created,
            succeeded: false,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Lower-cased input extension, empty when there is none.
    pub fn extension(&self) -> String {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }

    fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.status.can_advance_to(next),
            "illegal job transition {} -> {}",
            self.status,
            next
        );
        self.status = next;
        self.updated_at = Utc::now();
    }

    pub fn binary_located(&mut self) {
        self.advance(JobState::BinaryLocated);
    }

    pub fn binary_missing(&mut self, error: String) {
        self.advance(JobState::FailBinaryMissing);
        self.error = Some(error);
    }

    pub fn input_written(&mut self) {
        self.advance(JobState::InputWritten);
    }

    pub fn start_converting(&mut self) {
        self.advance(JobState::Converting);
    }

    pub fn mark_succeeded(&mut self) {
        self.advance(JobState::Succeeded);
        self.succeeded = true;
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.advance(JobState::FailedConversion);
        self.error = Some(error);
    }

    /// Records an error raised outside the conversion itself, e.g. a
    /// workspace failure, without changing state.
    pub fn record_error(&mut self, error: String) {
        self.succeeded = false;
        self.error = Some(error);
        self.updated_at = Utc::now();
    }

    pub fn mark_cleaned_up(&mut self) {
        self.advance(JobState::CleanedUp);
    }

    pub fn processing_duration_ms(&self) -> Option<i64> {
        if self.status.is_terminal() {
            Some(
                self.updated_at
                    .signed_duration_since(self.created_at)
                    .num_milliseconds(),
            )
        } else {
            None
        }
    }
}
