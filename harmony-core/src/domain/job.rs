//! Job domain types
//!
//! A job tracks one asynchronous request from acceptance to a terminal state.
//! Transitions are validated here so every store applies the same rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Job record
///
/// Structure shared between the job store (persists) and the invoker (drives transitions).
/// Status, message, progress and links only change through [`Job::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner: String,
    status: JobStatus,
    message: String,
    progress: i32,
    links: Vec<JobLink>,
    pub created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A job as read back from storage
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub id: Uuid,
    pub owner: String,
    pub status: JobStatus,
    pub message: String,
    pub progress: i32,
    pub links: Vec<JobLink>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StoredJob> for Job {
    fn from(stored: StoredJob) -> Self {
        Self {
            id: stored.id,
            owner: stored.owner,
            status: stored.status,
            message: stored.message,
            progress: stored.progress,
            links: stored.links,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Running,
    Successful,
    Failed,
    Canceled,
}

/// Location of a job result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLink {
    pub href: String,
}

impl JobLink {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

/// A requested state change, applied atomically by [`Job::apply`]
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub message: Option<String>,
    pub progress: Option<i32>,
    pub links: Vec<JobLink>,
}

impl JobUpdate {
    /// Backend accepted the work
    pub fn running() -> Self {
        Self {
            status: JobStatus::Running,
            message: None,
            progress: None,
            links: Vec::new(),
        }
    }

    /// Progress report while running
    pub fn progress(progress: i32, message: Option<String>) -> Self {
        Self {
            status: JobStatus::Running,
            message,
            progress: Some(progress),
            links: Vec::new(),
        }
    }

    pub fn successful(links: Vec<JobLink>, message: Option<String>) -> Self {
        Self {
            status: JobStatus::Successful,
            message,
            progress: Some(100),
            links,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            message: Some(message.into()),
            progress: None,
            links: Vec::new(),
        }
    }

    pub fn canceled() -> Self {
        Self {
            status: JobStatus::Canceled,
            message: None,
            progress: None,
            links: Vec::new(),
        }
    }
}

/// Rejected state change. The job is left untouched whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job is already {from} and cannot move to {to}")]
    Terminal { from: JobStatus, to: JobStatus },

    #[error("illegal transition from {from} to {to}")]
    Illegal { from: JobStatus, to: JobStatus },

    #[error("a successful job requires at least one link")]
    MissingLinks,

    #[error("links may only be attached on success")]
    UnexpectedLinks,

    #[error("a failed job requires a message")]
    MissingMessage,

    #[error("progress {0} is outside 0..=100")]
    ProgressOutOfRange(i32),

    #[error("progress cannot move backwards from {current} to {requested}")]
    ProgressRegression { current: i32, requested: i32 },
}

impl Job {
    /// Creates a job in the `created` state owned by `owner`
    pub fn new(owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            status: JobStatus::Created,
            message: JobStatus::Created.default_message().to_string(),
            progress: 0,
            links: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies `update`, validating the whole change before touching any field
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), TransitionError> {
        let from = self.status;
        let to = update.status;

        if from.is_terminal() {
            return Err(TransitionError::Terminal { from, to });
        }
        if !from.can_transition_to(to) {
            return Err(TransitionError::Illegal { from, to });
        }

        if let Some(progress) = update.progress {
            if !(0..=100).contains(&progress) {
                return Err(TransitionError::ProgressOutOfRange(progress));
            }
            if to == JobStatus::Running && progress < self.progress {
                return Err(TransitionError::ProgressRegression {
                    current: self.progress,
                    requested: progress,
                });
            }
        }

        match to {
            JobStatus::Successful if update.links.is_empty() => {
                return Err(TransitionError::MissingLinks);
            }
            JobStatus::Successful => {}
            _ if !update.links.is_empty() => return Err(TransitionError::UnexpectedLinks),
            _ => {}
        }

        let message = match update.message {
            Some(message) if !message.trim().is_empty() => Some(message),
            _ => None,
        };
        if to == JobStatus::Failed && message.is_none() {
            return Err(TransitionError::MissingMessage);
        }

        self.status = to;
        if let Some(message) = message {
            self.message = message;
        } else if from != to {
            self.message = to.default_message().to_string();
        }
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if to == JobStatus::Successful {
            self.links = update.links;
        }
        self.updated_at = Utc::now();

        Ok(())
    }

    pub fn is_owned_by(&self, requester: &str) -> bool {
        self.owner == requester
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn progress(&self) -> i32 {
        self.progress
    }

    pub fn links(&self) -> &[JobLink] {
        &self.links
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Edges of the job state machine. `running → running` carries progress reports.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, next),
            (Created, Running)
                | (Created, Canceled)
                | (Running, Running)
                | (Running, Successful)
                | (Running, Failed)
                | (Running, Canceled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            JobStatus::Created => "The job has been created",
            JobStatus::Running => "The job is being processed",
            JobStatus::Successful => "The job has completed successfully",
            JobStatus::Failed => "The job has failed",
            JobStatus::Canceled => "The job was canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "running" => Ok(JobStatus::Running),
            "successful" => Ok(JobStatus::Successful),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
