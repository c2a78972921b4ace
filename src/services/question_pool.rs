//! Pool-backed card serving: reserve-and-pull from the per-key queue with
//! session dedup, coalesced background refills, and a bounded database
//! fallback.

use std::sync::Arc;

use dashmap::DashSet;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::config::PoolConfig;
use crate::dao::card_store::{CardQueryFilter, CardStore};
use crate::dto::card::CardResponse;
use crate::dto::stats::PoolKeyStats;
use crate::error::ServiceError;
use crate::services::pool_store::{PoolKey, PoolQueue, QuestionPoolStore};
use crate::services::session_tracker::SessionCardTracker;

/// Reservation attempts against fresh database draws before giving up.
const FALLBACK_ATTEMPTS: usize = 5;

/// Serves the next card for (topic, difficulty, language, session), pooling
/// pre-fetched projections per key and guaranteeing a session never receives
/// the same card twice.
#[derive(Clone)]
pub struct QuestionPoolService {
    store: Arc<dyn QuestionPoolStore>,
    tracker: SessionCardTracker,
    config: PoolConfig,
    refill_in_flight: Arc<DashSet<PoolKey>>,
}

impl QuestionPoolService {
    /// Assemble the service from its pool store, session tracker, and config.
    pub fn new(
        store: Arc<dyn QuestionPoolStore>,
        tracker: SessionCardTracker,
        config: PoolConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            config,
            refill_in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Serve the next card for the request.
    ///
    /// Uses the pool queue when pooling is enabled and both topic and
    /// difficulty are present; otherwise (and on a pool miss) draws directly
    /// from the bank. Every returned card goes through a session reservation
    /// first, so concurrent requests for one session cannot double-serve an
    /// id.
    pub async fn next_card(
        &self,
        card_store: Arc<dyn CardStore>,
        topic: Option<&str>,
        difficulty: Option<&str>,
        language: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<CardResponse, ServiceError> {
        if !self.config.enabled || is_blank(topic) || is_blank(difficulty) {
            return self
                .fallback_draw(card_store, topic, difficulty, language, session_id, None)
                .await;
        }

        let key = PoolKey::from_parts(
            topic.unwrap_or_default(),
            difficulty.unwrap_or_default(),
            language,
        );
        let queue = self.store.queue_for_key(&key);
        let reserved = self.reserve_from_queue(&queue, session_id);

        if queue.len() < self.config.low_watermark_per_key {
            self.trigger_refill(card_store.clone(), key.clone());
        }

        if let Some(card) = reserved {
            self.store.record_cache_hit(&key);
            return Ok(card);
        }

        self.store.record_cache_miss(&key);
        warn!(
            topic = key.topic(),
            difficulty = key.difficulty(),
            language = key.language(),
            "question pool empty; using database fallback"
        );
        self.fallback_draw(card_store, topic, difficulty, language, session_id, Some(&key))
            .await
    }

    /// Stats for every pool key observed so far.
    pub fn stats(&self) -> Vec<PoolKeyStats> {
        self.store.snapshot()
    }

    /// Refill every pool key present in the bank. Invoked once per storage
    /// installation; per-key failures are logged and skipped.
    pub async fn warmup(&self, card_store: Arc<dyn CardStore>) {
        if !self.config.enabled {
            info!("question pool disabled by configuration");
            return;
        }

        let keys = match card_store.find_all_pool_keys().await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "pool warmup aborted: could not enumerate pool keys");
                return;
            }
        };

        info!(keys = keys.len(), "warming question pool");
        for parts in keys {
            let key = PoolKey::from_parts(&parts.topic, &parts.difficulty, Some(&parts.language));
            if let Err(err) = self.refill_pool(card_store.clone(), &key).await {
                warn!(
                    error = %err,
                    topic = key.topic(),
                    difficulty = key.difficulty(),
                    language = key.language(),
                    "pool warmup refill failed"
                );
            }
        }
    }

    /// Dequeue until a candidate can be reserved for the session.
    ///
    /// Candidates that are already served (or lose the reservation race to a
    /// concurrent request on the same session) are set aside and re-enqueued
    /// in their original relative order. Attempts are bounded by the queue
    /// length observed at entry.
    fn reserve_from_queue(
        &self,
        queue: &PoolQueue,
        session_id: Option<&str>,
    ) -> Option<CardResponse> {
        let attempts = queue.len();
        let mut set_aside = Vec::new();
        let mut reserved = None;

        for _ in 0..attempts {
            let Some(candidate) = queue.pop_front() else {
                break;
            };
            if self.tracker.is_served(session_id, &candidate.id) {
                set_aside.push(candidate);
                continue;
            }
            if self.tracker.try_mark_served(session_id, &candidate.id) {
                reserved = Some(candidate);
                break;
            }
            // Lost the reservation race to a concurrent request for the same
            // session; treat the candidate as served.
            set_aside.push(candidate);
        }

        queue.extend_back(set_aside);
        reserved
    }

    /// Draw directly from the bank, excluding everything the session has
    /// seen, reserving before returning. Bounded retries tolerate concurrent
    /// reservations on the same session.
    async fn fallback_draw(
        &self,
        card_store: Arc<dyn CardStore>,
        topic: Option<&str>,
        difficulty: Option<&str>,
        language: Option<&str>,
        session_id: Option<&str>,
        key: Option<&PoolKey>,
    ) -> Result<CardResponse, ServiceError> {
        let filter = CardQueryFilter {
            topic: normalize_optional(topic),
            difficulty: normalize_optional(difficulty),
            language: normalize_optional(language),
        };
        let mut excluded = self.tracker.served_ids(session_id);

        for _ in 0..FALLBACK_ATTEMPTS {
            let candidate = card_store
                .find_random(filter.clone(), excluded.iter().cloned().collect())
                .await?;
            let Some(card) = candidate else {
                return Err(ServiceError::NotFound(
                    "no cards available for requested filters".into(),
                ));
            };

            if self.tracker.try_mark_served(session_id, &card.id) {
                if let Some(key) = key {
                    self.store.record_fallback_db_hit(key);
                }
                return Ok(card.into());
            }
            excluded.insert(card.id);
        }

        Err(ServiceError::NotFound(format!(
            "no reservable card after {FALLBACK_ATTEMPTS} fallback attempts"
        )))
    }

    /// Kick off an asynchronous refill for a key unless one is already in
    /// flight. The in-flight marker is released when the task finishes,
    /// whether it succeeded or not.
    fn trigger_refill(&self, card_store: Arc<dyn CardStore>, key: PoolKey) {
        if !self.refill_in_flight.insert(key.clone()) {
            return;
        }

        let service = self.clone();
        tokio::spawn(async move {
            let _release = InFlightRelease {
                set: service.refill_in_flight.clone(),
                key: key.clone(),
            };
            if let Err(err) = service.refill_pool(card_store, &key).await {
                warn!(
                    error = %err,
                    topic = key.topic(),
                    difficulty = key.difficulty(),
                    language = key.language(),
                    "background pool refill failed"
                );
            }
        });
    }

    /// Top the key's queue up to min(bank size, configured target) with a
    /// uniformly shuffled copy of the bank.
    async fn refill_pool(
        &self,
        card_store: Arc<dyn CardStore>,
        key: &PoolKey,
    ) -> Result<(), ServiceError> {
        let queue = self.store.queue_for_key(key);
        let bank_size = card_store
            .count_by_pool_key(
                key.topic().to_owned(),
                key.difficulty().to_owned(),
                key.language().to_owned(),
            )
            .await?;

        if bank_size < self.config.minimum_per_key {
            warn!(
                topic = key.topic(),
                difficulty = key.difficulty(),
                language = key.language(),
                available = bank_size,
                required = self.config.minimum_per_key,
                "insufficient bank for pool key"
            );
        }

        let target = bank_size.min(self.config.refill_target_per_key) as usize;
        if queue.len() >= target {
            return Ok(());
        }

        let mut cards = card_store
            .find_all_by_pool_key(
                key.topic().to_owned(),
                key.difficulty().to_owned(),
                key.language().to_owned(),
            )
            .await?;
        if cards.is_empty() {
            return Ok(());
        }

        cards.shuffle(&mut rand::rng());
        let mut added = 0;
        for card in cards {
            if queue.len() >= target {
                break;
            }
            queue.push_back(card.into());
            added += 1;
        }
        self.store.record_refill(key, added);
        Ok(())
    }
}

/// Removes a key from the in-flight set on drop so a failed refill never
/// wedges future triggers.
struct InFlightRelease {
    set: Arc<DashSet<PoolKey>>,
    key: PoolKey,
}

impl Drop for InFlightRelease {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|value| value.trim().is_empty())
}

fn normalize_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::BoxFuture;

    use super::*;
    use crate::config::SessionConfig;
    use crate::dao::models::{CardEntity, PoolKeyParts};
    use crate::dao::storage::{StorageError, StorageResult};
    use crate::services::pool_store::InMemoryQuestionPoolStore;

    fn card(id: &str, topic: &str, difficulty: &str) -> CardEntity {
        CardEntity {
            id: id.into(),
            topic: topic.into(),
            subtopic: None,
            category: Some("OPEN".into()),
            language: "en".into(),
            question: format!("question {id}"),
            options: vec![String::new(); 10],
            correct_index: Some(0),
            correct_flags: None,
            correct_meta: None,
            difficulty: difficulty.into(),
            source: "quizdeck-v2".into(),
            created_at_ms: None,
        }
    }

    #[derive(Default)]
    struct StubState {
        bank: Vec<CardEntity>,
        ignore_exclusions: bool,
        fail_counts: bool,
        random_calls: AtomicUsize,
        count_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    #[derive(Clone, Default)]
    struct StubCardStore(Arc<StubState>);

    impl StubCardStore {
        fn with_bank(bank: Vec<CardEntity>) -> Self {
            Self(Arc::new(StubState {
                bank,
                ..Default::default()
            }))
        }

        fn matching(&self, topic: &Option<String>, difficulty: &Option<String>) -> Vec<CardEntity> {
            self.0
                .bank
                .iter()
                .filter(|card| topic.as_deref().is_none_or(|t| card.topic == t))
                .filter(|card| difficulty.as_deref().is_none_or(|d| card.difficulty == d))
                .cloned()
                .collect()
        }
    }

    impl CardStore for StubCardStore {
        fn find_random(
            &self,
            filter: CardQueryFilter,
            excluded_ids: Vec<String>,
        ) -> BoxFuture<'static, StorageResult<Option<CardEntity>>> {
            let stub = self.clone();
            Box::pin(async move {
                stub.0.random_calls.fetch_add(1, Ordering::SeqCst);
                let found = stub
                    .matching(&filter.topic, &filter.difficulty)
                    .into_iter()
                    .find(|card| {
                        stub.0.ignore_exclusions || !excluded_ids.contains(&card.id)
                    });
                Ok(found)
            })
        }

        fn find_all_by_pool_key(
            &self,
            topic: String,
            difficulty: String,
            _language: String,
        ) -> BoxFuture<'static, StorageResult<Vec<CardEntity>>> {
            let stub = self.clone();
            Box::pin(async move {
                stub.0.fetch_calls.fetch_add(1, Ordering::SeqCst);
                Ok(stub.matching(&Some(topic), &Some(difficulty)))
            })
        }

        fn count_by_pool_key(
            &self,
            topic: String,
            difficulty: String,
            _language: String,
        ) -> BoxFuture<'static, StorageResult<u64>> {
            let stub = self.clone();
            Box::pin(async move {
                stub.0.count_calls.fetch_add(1, Ordering::SeqCst);
                if stub.0.fail_counts {
                    return Err(StorageError::unavailable(
                        "count failed".into(),
                        std::io::Error::other("boom"),
                    ));
                }
                Ok(stub.matching(&Some(topic), &Some(difficulty)).len() as u64)
            })
        }

        fn find_all_pool_keys(&self) -> BoxFuture<'static, StorageResult<Vec<PoolKeyParts>>> {
            let stub = self.clone();
            Box::pin(async move {
                let mut keys: Vec<PoolKeyParts> = Vec::new();
                for card in &stub.0.bank {
                    let exists = keys.iter().any(|k| {
                        k.topic == card.topic
                            && k.difficulty == card.difficulty
                            && k.language == card.language
                    });
                    if !exists {
                        keys.push(PoolKeyParts {
                            topic: card.topic.clone(),
                            difficulty: card.difficulty.clone(),
                            language: card.language.clone(),
                        });
                    }
                }
                Ok(keys)
            })
        }

        fn find_deck(
            &self,
            _language: String,
            _topic: Option<String>,
            _allowed_sources: Vec<String>,
        ) -> BoxFuture<'static, StorageResult<Vec<CardEntity>>> {
            Box::pin(async move { Ok(Vec::new()) })
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(async move { Ok(()) })
        }
    }

    fn pool_config() -> PoolConfig {
        PoolConfig {
            enabled: true,
            minimum_per_key: 2,
            low_watermark_per_key: 0,
            refill_target_per_key: 10,
        }
    }

    fn service(config: PoolConfig) -> QuestionPoolService {
        QuestionPoolService::new(
            Arc::new(InMemoryQuestionPoolStore::new()),
            SessionCardTracker::new(&SessionConfig::default()),
            config,
        )
    }

    fn preload(service: &QuestionPoolService, key: &PoolKey, ids: &[&str]) -> Arc<PoolQueue> {
        let queue = service.store.queue_for_key(key);
        for id in ids {
            queue.push_back(card(id, key.topic(), key.difficulty()).into());
        }
        queue
    }

    async fn wait_for_refill(service: &QuestionPoolService) {
        for _ in 0..200 {
            if service.refill_in_flight.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("refill never finished");
    }

    #[tokio::test]
    async fn pooled_hit_serves_from_queue_without_touching_the_bank() {
        let service = service(pool_config());
        let store = StubCardStore::default();
        let key = PoolKey::from_parts("history", "2", None);
        preload(&service, &key, &["a", "b"]);

        let served = service
            .next_card(Arc::new(store.clone()), Some("history"), Some("2"), None, Some("s1"))
            .await
            .unwrap();

        assert_eq!(served.id, "a");
        assert_eq!(store.0.random_calls.load(Ordering::SeqCst), 0);
        let stats = service.stats();
        assert_eq!(stats[0].cache_hits, 1);
        assert_eq!(stats[0].cache_misses, 0);
    }

    #[tokio::test]
    async fn served_candidates_are_skipped_and_reenqueued_in_order() {
        let service = service(pool_config());
        let key = PoolKey::from_parts("history", "2", None);
        let queue = preload(&service, &key, &["a", "b", "c"]);

        // The session already saw "a" and "b".
        assert!(service.tracker.try_mark_served(Some("s1"), "a"));
        assert!(service.tracker.try_mark_served(Some("s1"), "b"));

        let served = service
            .next_card(
                Arc::new(StubCardStore::default()),
                Some("history"),
                Some("2"),
                None,
                Some("s1"),
            )
            .await
            .unwrap();

        assert_eq!(served.id, "c");
        assert_eq!(queue.pop_front().unwrap().id, "a");
        assert_eq!(queue.pop_front().unwrap().id, "b");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn same_session_never_receives_a_card_twice() {
        let service = service(pool_config());
        let store = StubCardStore::with_bank(vec![
            card("a", "history", "2"),
            card("b", "history", "2"),
        ]);
        let key = PoolKey::from_parts("history", "2", None);
        preload(&service, &key, &["a", "b"]);

        let first = service
            .next_card(Arc::new(store.clone()), Some("history"), Some("2"), None, Some("s1"))
            .await
            .unwrap();
        let second = service
            .next_card(Arc::new(store.clone()), Some("history"), Some("2"), None, Some("s1"))
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_for_one_session_never_repeat_a_card() {
        let service = service(pool_config());
        let bank: Vec<CardEntity> = (0..64)
            .map(|i| card(&format!("c{i}"), "history", "2"))
            .collect();
        let store = Arc::new(StubCardStore::with_bank(bank));
        let key = PoolKey::from_parts("history", "2", None);
        let ids: Vec<String> = (0..64).map(|i| format!("c{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        preload(&service, &key, &id_refs);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let service = service.clone();
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                service
                    .next_card(store, Some("history"), Some("2"), None, Some("s1"))
                    .await
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let served = handle.await.unwrap().unwrap();
            assert!(seen.insert(served.id.clone()), "card {} served twice", served.id);
        }
        assert_eq!(seen.len(), 32);
    }

    #[tokio::test]
    async fn disabled_pool_never_touches_the_queue() {
        let mut config = pool_config();
        config.enabled = false;
        let service = service(config);
        let store = StubCardStore::with_bank(vec![card("a", "history", "2")]);

        let served = service
            .next_card(Arc::new(store.clone()), Some("history"), Some("2"), None, Some("s1"))
            .await
            .unwrap();

        assert_eq!(served.id, "a");
        assert_eq!(store.0.random_calls.load(Ordering::SeqCst), 1);
        assert!(service.stats().is_empty());
    }

    #[tokio::test]
    async fn blank_topic_or_difficulty_uses_fallback() {
        let service = service(pool_config());
        let store = StubCardStore::with_bank(vec![card("a", "history", "2")]);

        let served = service
            .next_card(Arc::new(store.clone()), Some("  "), Some("2"), None, None)
            .await
            .unwrap();
        assert_eq!(served.id, "a");

        service
            .next_card(Arc::new(store.clone()), Some("history"), None, None, None)
            .await
            .unwrap();
        assert_eq!(store.0.random_calls.load(Ordering::SeqCst), 2);
        assert!(service.stats().is_empty());
    }

    #[tokio::test]
    async fn empty_pool_records_miss_and_falls_back() {
        let service = service(pool_config());
        let store = StubCardStore::with_bank(vec![card("a", "history", "2")]);

        let served = service
            .next_card(Arc::new(store.clone()), Some("history"), Some("2"), None, Some("s1"))
            .await
            .unwrap();

        assert_eq!(served.id, "a");
        wait_for_refill(&service).await;
        let stats = service.stats();
        assert_eq!(stats[0].cache_misses, 1);
        assert_eq!(stats[0].fallback_db_hits, 1);
    }

    #[tokio::test]
    async fn fallback_fails_not_found_when_bank_is_exhausted() {
        let service = service(pool_config());
        let store = StubCardStore::with_bank(vec![card("a", "history", "2")]);
        assert!(service.tracker.try_mark_served(Some("s1"), "a"));

        let err = service
            .next_card(Arc::new(store), Some("history"), Some("2"), None, Some("s1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn fallback_gives_up_after_bounded_reservation_attempts() {
        let service = service(pool_config());
        let store = StubCardStore(Arc::new(StubState {
            bank: vec![card("a", "history", "2")],
            ignore_exclusions: true,
            ..Default::default()
        }));
        assert!(service.tracker.try_mark_served(Some("s1"), "a"));

        let err = service
            .next_card(Arc::new(store.clone()), Some("history"), Some("2"), None, Some("s1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(
            store.0.random_calls.load(Ordering::SeqCst),
            FALLBACK_ATTEMPTS
        );
    }

    #[tokio::test]
    async fn refill_fills_to_min_of_bank_and_target() {
        let service = service(pool_config());
        let store = StubCardStore::with_bank(vec![
            card("a", "history", "2"),
            card("b", "history", "2"),
            card("c", "history", "2"),
        ]);
        let key = PoolKey::from_parts("history", "2", None);

        service
            .refill_pool(Arc::new(store.clone()), &key)
            .await
            .unwrap();

        // Bank (3) is below the target (10): fill everything, warn only.
        assert_eq!(service.store.queue_for_key(&key).len(), 3);
        assert_eq!(service.stats()[0].refill_count, 1);
    }

    #[tokio::test]
    async fn refill_never_exceeds_the_target() {
        let mut config = pool_config();
        config.refill_target_per_key = 2;
        let service = service(config);
        let store = StubCardStore::with_bank(vec![
            card("a", "history", "2"),
            card("b", "history", "2"),
            card("c", "history", "2"),
            card("d", "history", "2"),
        ]);
        let key = PoolKey::from_parts("history", "2", None);

        service
            .refill_pool(Arc::new(store.clone()), &key)
            .await
            .unwrap();
        assert_eq!(service.store.queue_for_key(&key).len(), 2);

        // A second refill over a full queue is a no-op.
        service.refill_pool(Arc::new(store), &key).await.unwrap();
        assert_eq!(service.store.queue_for_key(&key).len(), 2);
        assert_eq!(service.stats()[0].refill_count, 1);
    }

    #[tokio::test]
    async fn concurrent_triggers_coalesce_into_one_refill() {
        let service = service(pool_config());
        let store = StubCardStore::with_bank(vec![card("a", "history", "2")]);
        let key = PoolKey::from_parts("history", "2", None);

        service.trigger_refill(Arc::new(store.clone()), key.clone());
        service.trigger_refill(Arc::new(store.clone()), key.clone());
        service.trigger_refill(Arc::new(store.clone()), key.clone());
        wait_for_refill(&service).await;

        assert_eq!(store.0.count_calls.load(Ordering::SeqCst), 1);

        // The marker cleared, so a later trigger refills again.
        service.store.queue_for_key(&key).pop_front();
        service.trigger_refill(Arc::new(store.clone()), key);
        wait_for_refill(&service).await;
        assert_eq!(store.0.count_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refill_releases_the_in_flight_marker() {
        let service = service(pool_config());
        let failing = StubCardStore(Arc::new(StubState {
            bank: vec![card("a", "history", "2")],
            fail_counts: true,
            ..Default::default()
        }));
        let key = PoolKey::from_parts("history", "2", None);

        service.trigger_refill(Arc::new(failing.clone()), key.clone());
        wait_for_refill(&service).await;
        assert!(service.refill_in_flight.is_empty());

        let healthy = StubCardStore::with_bank(vec![card("a", "history", "2")]);
        service.trigger_refill(Arc::new(healthy.clone()), key.clone());
        wait_for_refill(&service).await;
        assert_eq!(service.store.queue_for_key(&key).len(), 1);
    }

    #[tokio::test]
    async fn warmup_refills_every_bank_key() {
        let service = service(pool_config());
        let store = StubCardStore::with_bank(vec![
            card("a", "history", "2"),
            card("b", "sports", "1"),
        ]);

        service.warmup(Arc::new(store)).await;

        let stats = service.stats();
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|s| s.pool_size == 1 && s.refill_count == 1));
    }
}
