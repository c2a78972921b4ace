use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use utoipa::ToSchema;

use crate::dao::models::CardEntity;

/// Card projection served to callers and queued in the question pool.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardResponse {
    /// Stable card identifier.
    pub id: String,
    /// Alias of `id` kept for older clients.
    pub card_id: String,
    /// Card topic.
    pub topic: String,
    /// Optional finer-grained topic.
    pub subtopic: Option<String>,
    /// Two-letter language code.
    pub language: String,
    /// Question text.
    pub question: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// Index of the correct option, when the card uses a single index.
    pub correct_index: Option<u32>,
    /// Difficulty label.
    pub difficulty: String,
    /// Content provenance tag.
    pub source: String,
    /// RFC 3339 creation timestamp.
    pub created_at: Option<String>,
    /// Per-option correctness flags; internal only, never serialized.
    #[serde(skip_serializing)]
    #[schema(ignore)]
    pub correct_flags: Option<String>,
}

impl From<CardEntity> for CardResponse {
    fn from(card: CardEntity) -> Self {
        Self {
            id: card.id.clone(),
            card_id: card.id,
            topic: card.topic,
            subtopic: card.subtopic,
            language: card.language,
            question: card.question,
            options: card.options,
            correct_index: card.correct_index,
            difficulty: card.difficulty,
            source: card.source,
            created_at: card.created_at_ms.and_then(format_ms),
            correct_flags: card.correct_flags,
        }
    }
}

fn format_ms(ms: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_flags_are_not_serialized() {
        let response = CardResponse {
            id: "c1".into(),
            card_id: "c1".into(),
            topic: "history".into(),
            subtopic: None,
            language: "en".into(),
            question: "?".into(),
            options: vec![String::new(); 10],
            correct_index: Some(3),
            difficulty: "2".into(),
            source: "quizdeck-v2".into(),
            created_at: None,
            correct_flags: Some("true,false".into()),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("correctFlags").is_none());
        assert_eq!(json["correctIndex"], 3);
        assert_eq!(json["cardId"], "c1");
    }
}
