use crate::error::IndexingError;
use crate::models::{IndexedDocument, UploadAck};
use crate::traits::SearchIndexService;
use tracing::{error, info, warn};

/// Uploads all documents in one batch. Partial acknowledgement is reported as
/// `Ok(false)`; the acknowledged subset stays in the index.
pub async fn store_documents(
    search: &dyn SearchIndexService,
    documents: &[IndexedDocument],
) -> Result<bool, IndexingError> {
    if documents.is_empty() {
        return Err(IndexingError::Validation(
            "no documents to store".to_string(),
        ));
    }

    let acks = search.upload_documents(documents).await?;

    match check_acknowledgements(documents.len(), &acks) {
        Ok(stored) => {
            info!(stored, "stored embeddings in search index");
            Ok(true)
        }
        Err(IndexingError::PartialStore { stored, total }) => {
            for ack in acks.iter().filter(|ack| !ack.succeeded) {
                warn!(id = %ack.id, error = ?ack.error, "document was not acknowledged");
            }
            error!(stored, total, "only part of the embeddings were stored");
            Ok(false)
        }
        Err(other) => Err(other),
    }
}

pub fn check_acknowledgements(total: usize, acks: &[UploadAck]) -> Result<usize, IndexingError> {
    let stored = acks.iter().filter(|ack| ack.succeeded).count();
    if stored == total {
        Ok(stored)
    } else {
        Err(IndexingError::PartialStore { stored, total })
    }
}
