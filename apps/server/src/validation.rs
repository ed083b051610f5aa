use circlevault_shared::constants::MIN_PASSWORD_LENGTH;
use circlevault_shared::error::VaultError;

/// Validate and normalize a member, circle or record name.
///
/// Trims whitespace, rejects empty strings, strings longer than `max`
/// characters, and strings containing control characters. `what` names the
/// field in the error message.
pub fn validate_name(name: &str, max: usize, what: &str) -> Result<String, VaultError> {
    let trimmed = name.trim().to_string();
    if trimmed.is_empty() {
        return Err(VaultError::Verification(format!("{what} is required")));
    }
    if trimmed.chars().count() > max {
        return Err(VaultError::Verification(format!(
            "{what} must be {max} characters or fewer"
        )));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(VaultError::Verification(format!(
            "{what} must not contain control characters"
        )));
    }
    Ok(trimmed)
}

/// Reject passwords shorter than [`MIN_PASSWORD_LENGTH`] characters.
pub fn validate_password(password: &str) -> Result<(), VaultError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(VaultError::Verification(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}
