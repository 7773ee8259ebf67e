use crate::models::{FileRecord, FileStatus, RunState, RunStatus, StatusUpdate, WriteOutcome};
use crate::traits::{FileRecordStore, WorkflowEngine};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_RUN_ERROR: &str = "Workflow failed";

pub fn file_status_for(state: RunState) -> FileStatus {
    match state {
        RunState::Pending => FileStatus::Pending,
        RunState::Running => FileStatus::InProgress,
        RunState::Completed => FileStatus::Completed,
        RunState::Failed => FileStatus::Failed,
    }
}

fn update_for(run: &RunStatus) -> StatusUpdate {
    match file_status_for(run.state) {
        FileStatus::Failed => StatusUpdate::failed(
            run.error
                .clone()
                .unwrap_or_else(|| DEFAULT_RUN_ERROR.to_string()),
        ),
        status => StatusUpdate::new(status),
    }
}

/// Brings a stored record in line with the engine's view of its run. Runs on
/// every read; failures fall back to the stored record.
pub struct StatusReconciler {
    engine: Arc<dyn WorkflowEngine>,
    records: Arc<dyn FileRecordStore>,
}

impl StatusReconciler {
    pub fn new(engine: Arc<dyn WorkflowEngine>, records: Arc<dyn FileRecordStore>) -> Self {
        Self { engine, records }
    }

    pub async fn reconcile(&self, record: FileRecord) -> FileRecord {
        let Some(run_id) = record.run_id.clone() else {
            return record;
        };

        let run = match self.engine.get_run_status(&run_id).await {
            Ok(run) => run,
            Err(poll_error) => {
                warn!(
                    file_id = %record.file_id,
                    run_id = %run_id,
                    error = %poll_error,
                    "could not poll workflow run, serving stored status"
                );
                return record;
            }
        };

        let update = update_for(&run);
        if update.status == record.status {
            return record;
        }

        match self
            .records
            .update_status(&record.file_id, record.generation, &update)
            .await
        {
            Ok(WriteOutcome::Applied) => info!(
                file_id = %record.file_id,
                run_id = %run_id,
                from = %record.status,
                to = %update.status,
                "reconciled file status"
            ),
            Ok(WriteOutcome::Stale) => debug!(
                file_id = %record.file_id,
                observed = %update.status,
                "stored record moved on during reconcile"
            ),
            Err(write_error) => {
                warn!(
                    file_id = %record.file_id,
                    error = %write_error,
                    "could not persist reconciled status"
                );
                return record;
            }
        }

        match self.records.get(&record.file_id).await {
            Ok(Some(current)) => current,
            _ => record,
        }
    }

    pub async fn reconcile_all(&self, records: Vec<FileRecord>) -> Vec<FileRecord> {
        let mut reconciled = Vec::with_capacity(records.len());
        for record in records {
            reconciled.push(self.reconcile(record).await);
        }
        reconciled
    }
}
