use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid slot: page={0}, slot={1}")]
    InvalidSlot(String, usize),

    #[error("Slot is empty: page={0}, slot={1}")]
    EmptySlot(String, usize),

    #[error("Page full: page={0}")]
    PageFull(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("NULL value for NOT NULL column: {0}")]
    NullConstraintViolation(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Record has no record id")]
    MissingRecordId,
}

pub type RecordResult<T> = Result<T, RecordError>;
