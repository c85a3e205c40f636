use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Watermark storage error: {0}")]
    Storage(String),

    #[error("Change fetch failed: {0}")]
    Fetch(String),

    #[error("Record {record_id} failed validation: missing {}", errors.join(", "))]
    Validation {
        record_id: i64,
        errors: Vec<String>,
    },

    #[error("Delivery failed after {attempts} attempt(s): {message}")]
    Delivery { attempts: u32, message: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
