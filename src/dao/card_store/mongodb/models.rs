use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::dao::models::{CardEntity, PoolKeyParts};

/// Card row as persisted in the `cards` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoCardDocument {
    #[serde(rename = "_id")]
    id: String,
    topic: String,
    #[serde(default)]
    subtopic: Option<String>,
    #[serde(default)]
    category: Option<String>,
    language: String,
    question: String,
    options: Vec<String>,
    #[serde(default)]
    correct_index: Option<u32>,
    #[serde(default)]
    correct_flags: Option<String>,
    #[serde(default)]
    correct_meta: Option<String>,
    difficulty: String,
    source: String,
    #[serde(default)]
    created_at: Option<DateTime>,
}

impl From<MongoCardDocument> for CardEntity {
    fn from(value: MongoCardDocument) -> Self {
        Self {
            id: value.id,
            topic: value.topic,
            subtopic: value.subtopic,
            category: value.category,
            language: value.language,
            question: value.question,
            options: value.options,
            correct_index: value.correct_index,
            correct_flags: value.correct_flags,
            correct_meta: value.correct_meta,
            difficulty: value.difficulty,
            source: value.source,
            created_at_ms: value.created_at.map(|ts| ts.timestamp_millis()),
        }
    }
}

/// `$group` result when enumerating distinct pool keys.
#[derive(Debug, Deserialize)]
pub struct PoolKeyGroupDocument {
    #[serde(rename = "_id")]
    key: PoolKeyGroupId,
}

#[derive(Debug, Deserialize)]
struct PoolKeyGroupId {
    topic: String,
    difficulty: String,
    #[serde(default)]
    language: Option<String>,
}

impl From<PoolKeyGroupDocument> for PoolKeyParts {
    fn from(value: PoolKeyGroupDocument) -> Self {
        Self {
            topic: value.key.topic,
            difficulty: value.key.difficulty,
            language: value.key.language.unwrap_or_else(|| "en".to_owned()),
        }
    }
}
