use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::{
    config::AppConfig,
    dao::{
        card_store::CardStore,
        history_store::{GameHistoryStore, memory::InMemoryGameHistoryStore},
    },
    error::ServiceError,
    services::{
        next_random::NextRandomCardService,
        pool_store::InMemoryQuestionPoolStore,
        question_pool::QuestionPoolService,
        session_tracker::SessionCardTracker,
    },
};

pub type SharedState = Arc<AppState>;

/// Central application state storing service handles and database stores.
pub struct AppState {
    config: AppConfig,
    card_store: RwLock<Option<Arc<dyn CardStore>>>,
    history_store: RwLock<Arc<dyn GameHistoryStore>>,
    pool: QuestionPoolService,
    deck: NextRandomCardService,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is
    /// installed; game history starts on the in-memory store and is replaced
    /// when a durable backend is configured and connected.
    pub fn new(config: AppConfig) -> SharedState {
        let tracker = SessionCardTracker::new(&config.session);
        let pool = QuestionPoolService::new(
            Arc::new(InMemoryQuestionPoolStore::new()),
            tracker,
            config.pool.clone(),
        );

        Arc::new(Self {
            config,
            card_store: RwLock::new(None),
            history_store: RwLock::new(Arc::new(InMemoryGameHistoryStore::new())),
            pool,
            deck: NextRandomCardService::new(),
        })
    }

    /// Application configuration loaded at startup.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current card store, if one is installed.
    pub async fn card_store(&self) -> Option<Arc<dyn CardStore>> {
        let guard = self.card_store.read().await;
        guard.as_ref().cloned()
    }

    /// Card store handle, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_card_store(&self) -> Result<Arc<dyn CardStore>, ServiceError> {
        self.card_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new card store implementation, leave degraded mode, and warm
    /// the question pool in the background.
    pub async fn install_card_store(&self, store: Arc<dyn CardStore>) {
        {
            let mut guard = self.card_store.write().await;
            *guard = Some(store.clone());
        }

        let pool = self.pool.clone();
        tokio::spawn(async move {
            info!("warming question pool");
            pool.warmup(store).await;
        });
    }

    /// Remove the current card store and enter degraded mode.
    pub async fn clear_card_store(&self) {
        let mut guard = self.card_store.write().await;
        guard.take();
    }

    /// Handle to the current game history store.
    pub async fn history_store(&self) -> Arc<dyn GameHistoryStore> {
        let guard = self.history_store.read().await;
        guard.clone()
    }

    /// Replace the game history store, used when the durable backend connects.
    pub async fn install_history_store(&self, store: Arc<dyn GameHistoryStore>) {
        let mut guard = self.history_store.write().await;
        *guard = store;
    }

    /// Degraded mode is simply the absence of an installed card store.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.card_store.read().await;
        guard.is_none()
    }

    /// Pooled card serving service.
    pub fn pool(&self) -> &QuestionPoolService {
        &self.pool
    }

    /// Deck-based next-random selection service.
    pub fn deck(&self) -> &NextRandomCardService {
        &self.deck
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use super::*;
    use crate::dao::{
        card_store::CardQueryFilter,
        models::{CardEntity, PoolKeyParts},
        storage::StorageResult,
    };

    struct EmptyCardStore;

    impl CardStore for EmptyCardStore {
        fn find_random(
            &self,
            _filter: CardQueryFilter,
            _excluded_ids: Vec<String>,
        ) -> BoxFuture<'static, StorageResult<Option<CardEntity>>> {
            Box::pin(async { Ok(None) })
        }

        fn find_all_by_pool_key(
            &self,
            _topic: String,
            _difficulty: String,
            _language: String,
        ) -> BoxFuture<'static, StorageResult<Vec<CardEntity>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn count_by_pool_key(
            &self,
            _topic: String,
            _difficulty: String,
            _language: String,
        ) -> BoxFuture<'static, StorageResult<u64>> {
            Box::pin(async { Ok(0) })
        }

        fn find_all_pool_keys(&self) -> BoxFuture<'static, StorageResult<Vec<PoolKeyParts>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn find_deck(
            &self,
            _language: String,
            _topic: Option<String>,
            _allowed_sources: Vec<String>,
        ) -> BoxFuture<'static, StorageResult<Vec<CardEntity>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn degraded_follows_card_store_installation() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded().await);
        assert!(matches!(
            state.require_card_store().await,
            Err(ServiceError::Degraded)
        ));

        state.install_card_store(Arc::new(EmptyCardStore)).await;
        assert!(!state.is_degraded().await);
        assert!(state.require_card_store().await.is_ok());

        state.clear_card_store().await;
        assert!(state.is_degraded().await);
    }
}
