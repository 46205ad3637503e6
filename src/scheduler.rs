//! Cron trigger for automated incremental backups.
//!
//! The manager owns no timer loop: this port registers a recurring trigger
//! with `tokio-cron-scheduler` that calls `create_backup` and logs the
//! outcome. Unregistering removes the trigger without touching in-flight
//! jobs.

use crate::error::{BackupError, Result};
use crate::manager::jobs::{JobKind, JobStatus};
use crate::manager::{BackupManager, BackupOptions};
use crate::models::backup_record::BackupKind;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    trigger: Mutex<Option<uuid::Uuid>>,
}

impl BackupScheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| BackupError::Scheduler(e.to_string()))?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            trigger: Mutex::new(None),
        })
    }

    /// Install the recurring backup trigger, replacing any previous one.
    pub async fn register_schedule(
        &self,
        cron_expression: &str,
        manager: Arc<BackupManager>,
    ) -> Result<()> {
        self.unregister().await?;

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let manager = manager.clone();
            Box::pin(async move {
                let backup_running = manager
                    .active_jobs()
                    .iter()
                    .any(|j| j.kind == JobKind::Backup && j.status == JobStatus::Running);
                if backup_running {
                    tracing::warn!("Skipping scheduled run: a backup is already running");
                    return;
                }

                tracing::info!("Starting scheduled incremental backup");
                let result = manager
                    .create_backup(BackupOptions {
                        kind: Some(BackupKind::Incremental),
                        automated: true,
                        ..Default::default()
                    })
                    .await;

                if result.success {
                    tracing::info!(
                        backup_id = %result.backup_id,
                        size = result.size,
                        entries = result.entry_count,
                        "Scheduled backup completed"
                    );
                } else {
                    tracing::error!(
                        backup_id = %result.backup_id,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Scheduled backup failed"
                    );
                }
            })
        })
        .map_err(|e| BackupError::Scheduler(e.to_string()))?;

        let id = self
            .scheduler
            .lock()
            .await
            .add(job)
            .await
            .map_err(|e| BackupError::Scheduler(e.to_string()))?;
        *self.trigger.lock().await = Some(id);
        tracing::info!(cron = %cron_expression, "Backup schedule registered");
        Ok(())
    }

    /// Remove the recurring trigger, if one is registered.
    pub async fn unregister(&self) -> Result<()> {
        if let Some(id) = self.trigger.lock().await.take() {
            self.scheduler
                .lock()
                .await
                .remove(&id)
                .await
                .map_err(|e| BackupError::Scheduler(e.to_string()))?;
            tracing::info!("Backup schedule unregistered");
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler
            .lock()
            .await
            .start()
            .await
            .map_err(|e| BackupError::Scheduler(e.to_string()))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler
            .lock()
            .await
            .shutdown()
            .await
            .map_err(|e| BackupError::Scheduler(e.to_string()))
    }
}
