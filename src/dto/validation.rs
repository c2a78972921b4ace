//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that a difficulty is a digit 1-3 or one of the named levels
/// `easy`, `medium`, `hard` (case-insensitive).
pub fn validate_difficulty(difficulty: &str) -> Result<(), ValidationError> {
    let normalized = difficulty.trim().to_lowercase();
    let valid = matches!(
        normalized.as_str(),
        "1" | "2" | "3" | "easy" | "medium" | "hard"
    );
    if !valid {
        let mut err = ValidationError::new("difficulty_format");
        err.message = Some("Difficulty must be 1-3 or easy/medium/hard".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a language code is exactly two ASCII letters.
pub fn validate_lang(lang: &str) -> Result<(), ValidationError> {
    let trimmed = lang.trim();
    if trimmed.len() != 2 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        let mut err = ValidationError::new("lang_format");
        err.message = Some("Language must be a two-letter code".into());
        return Err(err);
    }

    Ok(())
}
