use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database,
    bson::{Document, doc},
    options::IndexOptions,
};

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoCardDocument, PoolKeyGroupDocument},
};
use crate::dao::{
    card_store::{CardQueryFilter, CardStore},
    models::{CardEntity, PoolKeyParts},
    storage::StorageResult,
};

const CARD_COLLECTION_NAME: &str = "cards";
const HISTORY_COLLECTION_NAME: &str = "game_history";

/// Card bank backed by a MongoDB `cards` collection.
#[derive(Clone)]
pub struct MongoCardStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }
}

impl MongoCardStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    ///
    /// Reconnection is handled by constructing a fresh store; the supervisor
    /// drops this one when its health check fails.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner { database }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database();
        let cards = database.collection::<Document>(CARD_COLLECTION_NAME);

        let pool_key_index = mongodb::IndexModel::builder()
            .keys(doc! {"topic": 1, "difficulty": 1, "language": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("card_pool_key_idx".to_owned()))
                    .build(),
            )
            .build();
        cards
            .create_index(pool_key_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: CARD_COLLECTION_NAME,
                index: "topic,difficulty,language",
                source,
            })?;

        let deck_index = mongodb::IndexModel::builder()
            .keys(doc! {"language": 1, "source": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("card_deck_idx".to_owned()))
                    .build(),
            )
            .build();
        cards
            .create_index(deck_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: CARD_COLLECTION_NAME,
                index: "language,source",
                source,
            })?;

        // Index on the history collection for efficient per-game lookups.
        let history = database.collection::<Document>(HISTORY_COLLECTION_NAME);
        let history_index = mongodb::IndexModel::builder()
            .keys(doc! {"game_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("history_game_idx".to_owned()))
                    .build(),
            )
            .build();
        history
            .create_index(history_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: HISTORY_COLLECTION_NAME,
                index: "game_id",
                source,
            })?;

        Ok(())
    }

    /// Handle to the connected database, shared with the history store.
    pub fn database(&self) -> Database {
        self.inner.database.clone()
    }

    fn collection(&self) -> Collection<MongoCardDocument> {
        self.inner
            .database
            .collection::<MongoCardDocument>(CARD_COLLECTION_NAME)
    }

    async fn find_random(
        &self,
        filter: CardQueryFilter,
        excluded_ids: Vec<String>,
    ) -> MongoResult<Option<CardEntity>> {
        let mut match_doc = Document::new();
        if let Some(topic) = filter.topic {
            match_doc.insert("topic", topic);
        }
        if let Some(difficulty) = filter.difficulty {
            match_doc.insert("difficulty", difficulty);
        }
        if let Some(language) = filter.language {
            match_doc.insert("language", language);
        }
        if !excluded_ids.is_empty() {
            match_doc.insert("_id", doc! {"$nin": excluded_ids});
        }

        let pipeline = vec![doc! {"$match": match_doc}, doc! {"$sample": {"size": 1}}];

        let collection = self.collection();
        let mut cursor = collection
            .aggregate(pipeline)
            .with_type::<MongoCardDocument>()
            .await
            .map_err(|source| MongoDaoError::FindRandomCard { source })?;

        let document = cursor
            .try_next()
            .await
            .map_err(|source| MongoDaoError::FindRandomCard { source })?;
        Ok(document.map(Into::into))
    }

    async fn find_all_by_pool_key(
        &self,
        topic: String,
        difficulty: String,
        language: String,
    ) -> MongoResult<Vec<CardEntity>> {
        let key = format!("{topic}/{difficulty}/{language}");
        let filter = doc! {"topic": topic, "difficulty": difficulty, "language": language};

        let collection = self.collection();
        let documents: Vec<MongoCardDocument> = collection
            .find(filter)
            .await
            .map_err(|source| MongoDaoError::ListCards {
                key: key.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListCards { key, source })?;

        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn count_by_pool_key(
        &self,
        topic: String,
        difficulty: String,
        language: String,
    ) -> MongoResult<u64> {
        let key = format!("{topic}/{difficulty}/{language}");
        let filter = doc! {"topic": topic, "difficulty": difficulty, "language": language};

        let collection = self.collection();
        collection
            .count_documents(filter)
            .await
            .map_err(|source| MongoDaoError::CountCards { key, source })
    }

    async fn find_all_pool_keys(&self) -> MongoResult<Vec<PoolKeyParts>> {
        let pipeline = vec![doc! {"$group": {
            "_id": {"topic": "$topic", "difficulty": "$difficulty", "language": "$language"}
        }}];

        let collection = self.collection();
        let groups: Vec<PoolKeyGroupDocument> = collection
            .aggregate(pipeline)
            .with_type::<PoolKeyGroupDocument>()
            .await
            .map_err(|source| MongoDaoError::ListPoolKeys { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListPoolKeys { source })?;

        Ok(groups.into_iter().map(Into::into).collect())
    }

    async fn find_deck(
        &self,
        language: String,
        topic: Option<String>,
        allowed_sources: Vec<String>,
    ) -> MongoResult<Vec<CardEntity>> {
        let mut filter = doc! {
            "language": language.clone(),
            "source": {"$in": allowed_sources},
        };
        if let Some(topic) = topic {
            filter.insert("topic", topic);
        }

        let collection = self.collection();
        let documents: Vec<MongoCardDocument> = collection
            .find(filter)
            .await
            .map_err(|source| MongoDaoError::FindDeck {
                language: language.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::FindDeck { language, source })?;

        Ok(documents.into_iter().map(Into::into).collect())
    }
}

impl CardStore for MongoCardStore {
    fn find_random(
        &self,
        filter: CardQueryFilter,
        excluded_ids: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<Option<CardEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_random(filter, excluded_ids)
                .await
                .map_err(Into::into)
        })
    }

    fn find_all_by_pool_key(
        &self,
        topic: String,
        difficulty: String,
        language: String,
    ) -> BoxFuture<'static, StorageResult<Vec<CardEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_all_by_pool_key(topic, difficulty, language)
                .await
                .map_err(Into::into)
        })
    }

    fn count_by_pool_key(
        &self,
        topic: String,
        difficulty: String,
        language: String,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .count_by_pool_key(topic, difficulty, language)
                .await
                .map_err(Into::into)
        })
    }

    fn find_all_pool_keys(&self) -> BoxFuture<'static, StorageResult<Vec<PoolKeyParts>>> {
        let store = self.clone();
        Box::pin(async move { store.find_all_pool_keys().await.map_err(Into::into) })
    }

    fn find_deck(
        &self,
        language: String,
        topic: Option<String>,
        allowed_sources: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<Vec<CardEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_deck(language, topic, allowed_sources)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }
}
