use nestlog_core::CoreError;
use nestlog_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("association chain is empty")]
    EmptyChain,

    #[error("unknown root type: {0}")]
    UnknownRootType(String),

    #[error("{host} has no relation named {name}")]
    UnknownRelation { host: String, name: String },

    #[error("association chain does not resolve at step {step} ({name})")]
    ResolutionGap { step: usize, name: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no modifier field configured for {doc_type}")]
    SchemaConfiguration { doc_type: String },
}

impl EngineError {
    /// Map a store failure during create/update, treating constraint
    /// violations as validation failures.
    pub(crate) fn from_persist(err: StorageError) -> Self {
        match err {
            StorageError::ConstraintViolation(msg) => EngineError::Validation(msg),
            other => EngineError::Storage(other),
        }
    }
}
