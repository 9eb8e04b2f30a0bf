//! Checks shared by the routes that read or mutate a single vibe.

use crate::error::AppError;

/// Pass a fetched record through, or fail with [`AppError::NotFound`].
pub fn ensure_found<T>(record: Option<T>) -> Result<T, AppError> {
    record.ok_or(AppError::NotFound)
}

/// Fail with [`AppError::Forbidden`] unless `caller` is `owner`.
pub fn require_ownership(caller: &str, owner: &str) -> Result<(), AppError> {
    if caller == owner {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
