//! Entities exchanged with the card bank and the game history stores.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A trivia card row as stored in the content bank. Read-only to this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardEntity {
    /// Stable card identifier.
    pub id: String,
    /// Main topic, stored lowercased in the bank.
    pub topic: String,
    /// Optional finer-grained topic; doubles as a category hint.
    pub subtopic: Option<String>,
    /// Raw category label; resolved through [`Category::from_raw`].
    pub category: Option<String>,
    /// Two-letter language code, lowercased.
    pub language: String,
    /// Question text.
    pub question: String,
    /// Answer options in display order. Valid cards carry exactly ten.
    pub options: Vec<String>,
    /// Index of the single correct option, when the card uses one.
    pub correct_index: Option<u32>,
    /// Comma-joined boolean flag per option, when the card uses flags.
    pub correct_flags: Option<String>,
    /// Structured correctness metadata blob (JSON), when the card uses one.
    pub correct_meta: Option<String>,
    /// Free-form difficulty label, often numeric.
    pub difficulty: String,
    /// Content provenance tag.
    pub source: String,
    /// Creation time in epoch milliseconds.
    pub created_at_ms: Option<i64>,
}

impl CardEntity {
    /// Resolve the card's enumerated category, falling back to the subtopic
    /// when the explicit label is absent or blank.
    pub fn resolved_category(&self) -> Category {
        let raw = self
            .category
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .or(self.subtopic.as_deref());
        Category::from_raw(raw)
    }
}

/// Distinct (topic, difficulty, language) tuple present in the bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolKeyParts {
    pub topic: String,
    pub difficulty: String,
    pub language: String,
}

/// Minimal projection persisted into a game's serving history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckCardMeta {
    /// Identifier of the served card.
    pub card_id: String,
    /// Category the card resolved to when it was served.
    pub category: Category,
    /// Topic of the served card.
    pub topic: String,
}

/// Closed set of card categories. Unrecognized labels resolve to [`Category::Open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    TrueFalse,
    Number,
    Order,
    CenturyDecade,
    Color,
    Open,
}

impl Category {
    /// Normalize a raw label (trim, uppercase, `-`/space to `_`) and map it
    /// onto the closed category set, defaulting to [`Category::Open`].
    pub fn from_raw(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Category::Open;
        };
        if raw.trim().is_empty() {
            return Category::Open;
        }

        let normalized = raw
            .trim()
            .to_uppercase()
            .replace(['-', ' '], "_");

        match normalized.as_str() {
            "TRUE_FALSE" => Category::TrueFalse,
            "NUMBER" => Category::Number,
            "ORDER" => Category::Order,
            "CENTURY_DECADE" => Category::CenturyDecade,
            "COLOR" => Category::Color,
            _ => Category::Open,
        }
    }

    /// Canonical wire label for the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::TrueFalse => "TRUE_FALSE",
            Category::Number => "NUMBER",
            Category::Order => "ORDER",
            Category::CenturyDecade => "CENTURY_DECADE",
            Category::Color => "COLOR",
            Category::Open => "OPEN",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
