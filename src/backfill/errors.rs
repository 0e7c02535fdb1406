use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;

/// Failure of one fill attempt. The split decides retry policy: transient
/// failures are retried with backoff, permanent ones fail the gap outright.
#[derive(Debug, Error)]
pub enum FillError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl FillError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FillError::Transient(_))
    }
}

impl From<ApiError> for FillError {
    fn from(err: ApiError) -> Self {
        if err.is_recoverable() {
            FillError::Transient(err.to_string())
        } else {
            FillError::Permanent(err.to_string())
        }
    }
}

impl From<StoreError> for FillError {
    fn from(err: StoreError) -> Self {
        // Storage blips (pool exhaustion, dropped connections) are worth
        // retrying; conversion errors mean the payload itself is wrong.
        match err {
            StoreError::Conversion(_) | StoreError::InvalidTimestamp(_) => {
                FillError::Permanent(err.to_string())
            }
            _ => FillError::Transient(err.to_string()),
        }
    }
}
