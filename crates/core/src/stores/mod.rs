pub mod filesystem;
pub mod memory;
pub mod opensearch;
mod table;

pub use filesystem::{FsBlobStore, JsonFileRecordStore};
pub use memory::{MemoryBlobStore, MemoryFileRecordStore, MemorySearchIndex};
pub use opensearch::OpenSearchIndex;
