use thiserror::Error;

/// Failures surfaced by a [`RecordStore`](crate::store::RecordStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Email not found: {id}")]
    NotFound { id: String },

    #[error("Email already exists: {id}")]
    Conflict { id: String },

    #[error("Email {id} has an invalid date ({nanos} ns since epoch)")]
    InvalidDate { id: String, nanos: i64 },

    #[error("Email {id} has a date outside the storable range (1677-09-21 to 2262-04-11)")]
    DateOutOfRange { id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
