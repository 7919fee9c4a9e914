//! Conversions from job-core's internal errors into the façade's stable
//! `AppError` taxonomy (§7). `StoreError` and `AppError` are both foreign
//! to this crate, so the mapping is a free function rather than a `From`
//! impl — the orphan rule forbids implementing a foreign trait for a
//! foreign type.

use axum_helpers::AppError;
use job_core::StoreError;

pub type JobResult<T> = Result<T, AppError>;

/// `NotFound`/`CasMismatch` both collapse to the façade's generic
/// "not found" response: a CAS race (e.g. against a concurrent cancel) is
/// indistinguishable to the caller from the job simply not existing.
pub fn store_error(err: StoreError) -> AppError {
    match err {
        StoreError::NotFound(_) => AppError::NotFound,
        StoreError::CasMismatch(_) => AppError::NotFound,
        StoreError::Redis(e) => AppError::StoreUnavailable(e.to_string()),
        StoreError::Serde(e) => AppError::Internal(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_mismatch_maps_to_not_found() {
        let err = store_error(StoreError::CasMismatch("job-1".to_string()));
        assert!(matches!(err, AppError::NotFound));
    }

    #[test]
    fn redis_error_maps_to_store_unavailable() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"));
        let err = store_error(StoreError::Redis(redis_err));
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }
}
