use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid history record: {0}")]
    InvalidRecord(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("config error: {0}")]
    Config(String),
}
