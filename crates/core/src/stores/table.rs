use crate::error::IndexingError;
use crate::models::{FileRecord, StatusUpdate, WriteOutcome};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File records keyed by `file_id`, with the fenced mutations every record
/// store shares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RecordTable {
    files: BTreeMap<String, FileRecord>,
}

impl RecordTable {
    pub(crate) fn insert(&mut self, record: FileRecord) -> Result<(), IndexingError> {
        if self.files.contains_key(&record.file_id) {
            return Err(IndexingError::Validation(format!(
                "file {} already exists",
                record.file_id
            )));
        }
        self.files.insert(record.file_id.clone(), record);
        Ok(())
    }

    pub(crate) fn get(&self, file_id: &str) -> Option<FileRecord> {
        self.files.get(file_id).cloned()
    }

    pub(crate) fn list_by_owner(&self, owner_id: &str) -> Vec<FileRecord> {
        let mut records: Vec<_> = self
            .files
            .values()
            .filter(|record| record.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|left, right| right.uploaded_at.cmp(&left.uploaded_at));
        records
    }

    pub(crate) fn begin_run(&mut self, file_id: &str) -> Result<u64, IndexingError> {
        self.files
            .get_mut(file_id)
            .map(FileRecord::begin_run)
            .ok_or_else(|| IndexingError::not_found("file", file_id))
    }

    pub(crate) fn set_run_id(
        &mut self,
        file_id: &str,
        generation: u64,
        run_id: &str,
    ) -> Result<WriteOutcome, IndexingError> {
        let record = self.fenced(file_id, generation)?;
        Ok(match record {
            Some(record) => {
                record.run_id = Some(run_id.to_string());
                WriteOutcome::Applied
            }
            None => WriteOutcome::Stale,
        })
    }

    pub(crate) fn update_status(
        &mut self,
        file_id: &str,
        generation: u64,
        update: &StatusUpdate,
    ) -> Result<WriteOutcome, IndexingError> {
        let Some(record) = self.fenced(file_id, generation)? else {
            return Ok(WriteOutcome::Stale);
        };
        if record.status == update.status {
            return Ok(WriteOutcome::Applied);
        }
        if !record.status.can_transition_to(update.status) {
            return Ok(WriteOutcome::Stale);
        }
        record.apply(update, Utc::now());
        Ok(WriteOutcome::Applied)
    }

    pub(crate) fn delete(&mut self, file_id: &str) -> bool {
        self.files.remove(file_id).is_some()
    }

    fn fenced(
        &mut self,
        file_id: &str,
        generation: u64,
    ) -> Result<Option<&mut FileRecord>, IndexingError> {
        let record = self
            .files
            .get_mut(file_id)
            .ok_or_else(|| IndexingError::not_found("file", file_id))?;
        Ok((record.generation == generation).then_some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileStatus;

    #[test]
    fn stale_generations_cannot_write() -> Result<(), IndexingError> {
        let mut table = RecordTable::default();
        table.insert(FileRecord::new("f-1", "owner", "a.txt", "owner/f-1_a.txt"))?;

        let first = table.begin_run("f-1")?;
        let second = table.begin_run("f-1")?;
        assert_eq!((first, second), (1, 2));

        let stale = table.update_status("f-1", first, &StatusUpdate::failed("late"))?;
        assert_eq!(stale, WriteOutcome::Stale);
        assert_eq!(table.set_run_id("f-1", first, "run-old")?, WriteOutcome::Stale);

        let fresh = table.update_status("f-1", second, &StatusUpdate::new(FileStatus::InProgress))?;
        assert_eq!(fresh, WriteOutcome::Applied);

        let record = table.get("f-1").expect("record");
        assert_eq!(record.status, FileStatus::InProgress);
        assert!(record.run_id.is_none());
        Ok(())
    }

    #[test]
    fn status_writes_are_checked_against_the_stored_status() -> Result<(), IndexingError> {
        let mut table = RecordTable::default();
        table.insert(FileRecord::new("f-1", "owner", "a.txt", "owner/f-1_a.txt"))?;
        let generation = table.begin_run("f-1")?;

        let started = StatusUpdate::new(FileStatus::InProgress);
        assert_eq!(table.update_status("f-1", generation, &started)?, WriteOutcome::Applied);
        assert_eq!(table.update_status("f-1", generation, &started)?, WriteOutcome::Applied);

        let failed = StatusUpdate::failed("failed to store embeddings");
        assert_eq!(table.update_status("f-1", generation, &failed)?, WriteOutcome::Applied);

        let completed = StatusUpdate::new(FileStatus::Completed);
        assert_eq!(table.update_status("f-1", generation, &completed)?, WriteOutcome::Stale);
        let repeated = StatusUpdate::failed("Workflow failed");
        assert_eq!(table.update_status("f-1", generation, &repeated)?, WriteOutcome::Applied);

        let record = table.get("f-1").expect("record");
        assert_eq!(record.status, FileStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("failed to store embeddings"));
        Ok(())
    }

    #[test]
    fn duplicate_inserts_are_rejected() {
        let mut table = RecordTable::default();
        let record = FileRecord::new("f-1", "owner", "a.txt", "owner/f-1_a.txt");
        assert!(table.insert(record.clone()).is_ok());
        assert!(matches!(table.insert(record), Err(IndexingError::Validation(_))));
    }

    #[test]
    fn updates_to_unknown_files_are_not_found() {
        let mut table = RecordTable::default();
        let result = table.update_status("nope", 1, &StatusUpdate::new(FileStatus::Completed));
        assert!(matches!(result, Err(IndexingError::NotFound { .. })));
    }
}
