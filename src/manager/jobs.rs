//! In-flight job tracking for observability.
//!
//! Jobs move `pending → running → {completed | failed}`; terminal jobs are
//! dropped from the table. The table never serializes jobs against each
//! other.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Backup,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct JobTable {
    jobs: DashMap<String, JobInfo>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str, kind: JobKind) {
        self.jobs.insert(
            id.to_string(),
            JobInfo {
                id: id.to_string(),
                kind,
                status: JobStatus::Pending,
                started_at: Utc::now(),
            },
        );
    }

    pub fn mark_running(&self, id: &str) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            job.status = JobStatus::Running;
        }
    }

    /// Record the terminal status and drop the job from the table.
    pub fn finish(&self, id: &str, status: JobStatus) {
        if let Some((_, job)) = self.jobs.remove(id) {
            debug!(job_id = %id, kind = ?job.kind, status = ?status, "Job finished");
        }
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }

    /// Snapshot of all in-flight jobs.
    pub fn active(&self) -> Vec<JobInfo> {
        self.jobs.iter().map(|j| j.value().clone()).collect()
    }
}
