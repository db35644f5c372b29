pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;
pub use traits::{DocumentRecord, DocumentStore, Placement};
