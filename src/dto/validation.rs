//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::contest::RoomCode;

pub const TITLE_MAX_CHARS: usize = 20;
pub const DESCRIPTION_MAX_CHARS: usize = 200;
pub const TEXT_ANSWER_MAX_CHARS: usize = 32;

/// Validates that a room code has the shape of a generated one (case-insensitive).
///
/// # Examples
///
/// ```ignore
/// validate_room_code("K7QX2M") // Ok
/// validate_room_code("k7qx2m") // Ok
/// validate_room_code("K7QX2")  // Err - too short
/// validate_room_code("K7QX0M") // Err - `0` is never generated
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.trim().len() != RoomCode::LEN {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(format!("Room code must be exactly {} characters", RoomCode::LEN).into());
        return Err(err);
    }

    if RoomCode::parse(code).is_none() {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code contains characters that are never generated".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a title is non-blank and at most [`TITLE_MAX_CHARS`] characters.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        let mut err = ValidationError::new("title_blank");
        err.message = Some("Title must not be blank".into());
        return Err(err);
    }

    let length = title.chars().count();
    if length > TITLE_MAX_CHARS {
        let mut err = ValidationError::new("title_length");
        err.message = Some(
            format!("Title must be at most {TITLE_MAX_CHARS} characters (got {length})").into(),
        );
        return Err(err);
    }

    Ok(())
}

pub fn validate_description(description: &str) -> Result<(), ValidationError> {
    let length = description.chars().count();
    if length > DESCRIPTION_MAX_CHARS {
        let mut err = ValidationError::new("description_length");
        err.message = Some(
            format!("Description must be at most {DESCRIPTION_MAX_CHARS} characters (got {length})")
                .into(),
        );
        return Err(err);
    }
    Ok(())
}

pub fn validate_finite(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        let mut err = ValidationError::new("not_finite");
        err.message = Some("Score must be a finite number".into());
        Err(err)
    }
}

/// Validates that `value` lies in `min..=max`.
pub fn validate_bounded(value: u32, min: u32, max: u32) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    let mut err = ValidationError::new("range");
    err.add_param("min".into(), &min);
    err.add_param("max".into(), &max);
    err.add_param("value".into(), &value);
    err.message = Some(format!("Value must be between {min} and {max} (got {value})").into());
    Err(err)
}
