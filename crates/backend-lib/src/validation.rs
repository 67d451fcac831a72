// ============================
// crates/backend-lib/src/validation.rs
// ============================
//! Validation of client supplied identifiers and the connection access code.

use thiserror::Error;

const MAX_ID_LENGTH: usize = 128;
const MAX_USERNAME_LENGTH: usize = 64;

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid room ID: {0}")]
    InvalidRoomId(String),

    #[error("Invalid user ID: {0}")]
    InvalidUserId(String),

    #[error("Access code mismatch")]
    AccessCodeMismatch,
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

fn check_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("must not be empty".to_string());
    }
    if id.chars().count() > MAX_ID_LENGTH {
        return Err(format!("must be at most {MAX_ID_LENGTH} characters"));
    }
    if id.chars().any(char::is_control) {
        return Err("must not contain control characters".to_string());
    }
    Ok(())
}

/// Validate a room ID
pub fn validate_room_id(room_id: &str) -> ValidationResult<&str> {
    check_id(room_id).map_err(ValidationError::InvalidRoomId)?;
    Ok(room_id)
}

/// Validate a user ID
pub fn validate_user_id(user_id: &str) -> ValidationResult<&str> {
    check_id(user_id).map_err(ValidationError::InvalidUserId)?;
    Ok(user_id)
}

/// Display names are free text: trimmed, stripped of control characters
/// and capped in length.
pub fn sanitize_username(username: &str) -> String {
    username
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_USERNAME_LENGTH)
        .collect()
}

/// Check the code presented by a connecting client. `None` as expected code
/// means access gating is disabled.
pub fn check_access_code(expected: Option<&str>, provided: Option<&str>) -> ValidationResult<()> {
    match expected {
        None => Ok(()),
        Some(expected) if provided == Some(expected) => Ok(()),
        Some(_) => Err(ValidationError::AccessCodeMismatch),
    }
}
