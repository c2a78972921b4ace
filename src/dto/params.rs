use serde::Deserialize;
use utoipa::IntoParams;
use validator::Validate;

use super::validation::{validate_difficulty, validate_lang};

/// Query parameters accepted by `GET /api/cards/next`.
#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct NextCardParams {
    /// Card topic, matched case-insensitively.
    #[validate(length(min = 1, message = "Topic must not be empty"))]
    pub topic: String,
    /// Difficulty: 1-3 or easy/medium/hard.
    #[validate(custom(function = validate_difficulty))]
    pub difficulty: String,
    /// Session identifier for no-repeat tracking; untracked when absent.
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    /// Two-letter language code; defaults to `en`.
    #[validate(custom(function = validate_lang))]
    pub lang: Option<String>,
}

/// Query parameters accepted by `GET /api/cards/next-random`.
///
/// Presence of `lang` and `gameId` is enforced by the selection service so
/// the error names the missing field.
#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct NextRandomParams {
    /// Two-letter language code of the deck.
    #[validate(custom(function = validate_lang))]
    pub lang: Option<String>,
    /// Identifier of the live game.
    #[serde(rename = "gameId")]
    pub game_id: Option<String>,
    /// Optional topic restriction on the deck.
    pub topic: Option<String>,
}
