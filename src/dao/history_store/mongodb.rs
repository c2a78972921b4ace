//! Durable game history backed by a capped-per-game MongoDB collection.

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database,
    bson::{DateTime, doc, oid::ObjectId},
};
use serde::{Deserialize, Serialize};

use super::GameHistoryStore;
use crate::dao::card_store::mongodb::MongoDaoError;
use crate::dao::models::{Category, DeckCardMeta};
use crate::dao::storage::StorageResult;

const HISTORY_COLLECTION_NAME: &str = "game_history";

/// Served-card record in the `game_history` collection. Insertion order is
/// carried by the monotonic `_id`.
#[derive(Debug, Serialize, Deserialize)]
struct MongoHistoryDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    game_id: String,
    card_id: String,
    category: String,
    topic: String,
    created_at: DateTime,
}

impl From<MongoHistoryDocument> for DeckCardMeta {
    fn from(value: MongoHistoryDocument) -> Self {
        Self {
            card_id: value.card_id,
            category: Category::from_raw(Some(&value.category)),
            topic: value.topic,
        }
    }
}

/// History store sharing the database connection of the card store.
#[derive(Clone)]
pub struct MongoGameHistoryStore {
    database: Database,
}

impl MongoGameHistoryStore {
    /// Wrap an already-connected database handle.
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn collection(&self) -> Collection<MongoHistoryDocument> {
        self.database
            .collection::<MongoHistoryDocument>(HISTORY_COLLECTION_NAME)
    }

    async fn read_recent(
        &self,
        game_id: String,
        limit: usize,
    ) -> Result<Vec<DeckCardMeta>, MongoDaoError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let collection = self.collection();
        let mut documents: Vec<MongoHistoryDocument> = collection
            .find(doc! {"game_id": game_id.clone()})
            .sort(doc! {"_id": -1})
            .limit(limit as i64)
            .await
            .map_err(|source| MongoDaoError::ReadHistory {
                game_id: game_id.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ReadHistory { game_id, source })?;

        // Newest-first from the query; callers expect oldest-first.
        documents.reverse();
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn append(
        &self,
        game_id: String,
        meta: DeckCardMeta,
        max_size: usize,
    ) -> Result<(), MongoDaoError> {
        let collection = self.collection();

        if max_size == 0 {
            return self.evict(game_id).await;
        }

        let document = MongoHistoryDocument {
            id: None,
            game_id: game_id.clone(),
            card_id: meta.card_id,
            category: meta.category.as_str().to_owned(),
            topic: meta.topic,
            created_at: DateTime::now(),
        };
        collection
            .insert_one(document)
            .await
            .map_err(|source| MongoDaoError::AppendHistory {
                game_id: game_id.clone(),
                source,
            })?;

        let count = collection
            .count_documents(doc! {"game_id": game_id.clone()})
            .await
            .map_err(|source| MongoDaoError::AppendHistory {
                game_id: game_id.clone(),
                source,
            })?;
        let overflow = count.saturating_sub(max_size as u64);
        if overflow == 0 {
            return Ok(());
        }

        let oldest: Vec<MongoHistoryDocument> = collection
            .find(doc! {"game_id": game_id.clone()})
            .sort(doc! {"_id": 1})
            .limit(overflow as i64)
            .await
            .map_err(|source| MongoDaoError::AppendHistory {
                game_id: game_id.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::AppendHistory {
                game_id: game_id.clone(),
                source,
            })?;

        let ids: Vec<ObjectId> = oldest.into_iter().filter_map(|doc| doc.id).collect();
        if ids.is_empty() {
            return Ok(());
        }

        collection
            .delete_many(doc! {"_id": {"$in": ids}})
            .await
            .map_err(|source| MongoDaoError::AppendHistory { game_id, source })?;
        Ok(())
    }

    async fn evict(&self, game_id: String) -> Result<(), MongoDaoError> {
        self.collection()
            .delete_many(doc! {"game_id": game_id.clone()})
            .await
            .map_err(|source| MongoDaoError::EvictHistory { game_id, source })?;
        Ok(())
    }
}

impl GameHistoryStore for MongoGameHistoryStore {
    fn read_recent(
        &self,
        game_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<DeckCardMeta>>> {
        let store = self.clone();
        Box::pin(async move { store.read_recent(game_id, limit).await.map_err(Into::into) })
    }

    fn append(
        &self,
        game_id: String,
        meta: DeckCardMeta,
        max_size: usize,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .append(game_id, meta, max_size)
                .await
                .map_err(Into::into)
        })
    }

    fn evict(&self, game_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.evict(game_id).await.map_err(Into::into) })
    }
}
