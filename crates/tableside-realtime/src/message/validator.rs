//! Message validation rules.

use tableside_core::error::AppError;

/// Validates the size of an inbound frame against `max_bytes`.
pub fn validate_frame_size(len: usize, max_bytes: usize) -> Result<(), AppError> {
    if len > max_bytes {
        return Err(AppError::validation(format!(
            "Message of {len} bytes exceeds maximum size of {max_bytes} bytes"
        )));
    }
    Ok(())
}
