//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that an opaque identifier (party, user, media item, webRTC peer)
/// is non-blank and reasonably sized.
///
/// Identifiers are minted by the upstream backend; we never parse their shape,
/// only refuse the degenerate cases that would poison registry keys.
///
/// # Examples
///
/// ```ignore
/// validate_opaque_id("0b5c7e42-ffab-4f21-9d7e-3d9a2f1c0aa1") // Ok
/// validate_opaque_id("party-17")                             // Ok
/// validate_opaque_id("   ")                                  // Err - blank
/// ```
pub fn validate_opaque_id(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        let mut err = ValidationError::new("id_blank");
        err.message = Some("identifier must not be blank".into());
        return Err(err);
    }

    if id.len() > 128 {
        let mut err = ValidationError::new("id_length");
        err.message = Some(format!("identifier too long ({} > 128 bytes)", id.len()).into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a playback position is a finite, non-negative second count.
pub fn validate_position(position: f64) -> Result<(), ValidationError> {
    if !position.is_finite() {
        let mut err = ValidationError::new("position_not_finite");
        err.message = Some("position must be a finite number of seconds".into());
        return Err(err);
    }

    if position < 0.0 {
        let mut err = ValidationError::new("position_negative");
        err.message = Some(format!("position must be >= 0 (got {position})").into());
        return Err(err);
    }

    Ok(())
}
