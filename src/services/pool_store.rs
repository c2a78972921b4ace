//! Per-key question pool cache: normalized keys, FIFO card queues, and
//! observability counters.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::dto::card::CardResponse;
use crate::dto::stats::PoolKeyStats;
use crate::services::unix_ms;

/// Idle period after which an untouched key's queue is dropped.
const QUEUE_IDLE_EXPIRY: Duration = Duration::from_secs(2 * 60 * 60);
/// Maximum number of distinct keys the queue cache tracks.
const MAX_TRACKED_KEYS: u64 = 5_000;

/// Normalized (topic, difficulty, language) identity partitioning the cache.
///
/// Components are trimmed and lowercased; language defaults to `en` when
/// absent or blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    topic: String,
    difficulty: String,
    language: String,
}

impl PoolKey {
    /// Build a key from raw request values.
    pub fn from_parts(topic: &str, difficulty: &str, language: Option<&str>) -> Self {
        let language = language
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("en");
        Self {
            topic: normalize(topic),
            difficulty: normalize(difficulty),
            language: normalize(language),
        }
    }

    /// Normalized topic component.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Normalized difficulty component.
    pub fn difficulty(&self) -> &str {
        &self.difficulty
    }

    /// Normalized language component.
    pub fn language(&self) -> &str {
        &self.language
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// FIFO queue of ready-to-serve card projections for one pool key.
///
/// The queue carries its own lock so concurrent requests on the same key
/// contend only with each other, never with other keys.
#[derive(Default)]
pub struct PoolQueue {
    inner: Mutex<VecDeque<CardResponse>>,
}

impl PoolQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, VecDeque<CardResponse>> {
        // Queue operations cannot panic while holding the lock, so a poisoned
        // mutex still contains a consistent deque.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Dequeue the head card, if any.
    pub fn pop_front(&self) -> Option<CardResponse> {
        self.guard().pop_front()
    }

    /// Enqueue a card at the tail.
    pub fn push_back(&self, card: CardResponse) {
        self.guard().push_back(card);
    }

    /// Enqueue several cards at the tail, preserving their order.
    pub fn extend_back(&self, cards: impl IntoIterator<Item = CardResponse>) {
        self.guard().extend(cards);
    }

    /// Current queue length.
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

/// Cache of pre-fetched card projections plus per-key counters.
///
/// All operations are in-memory, non-blocking, and best-effort.
pub trait QuestionPoolStore: Send + Sync {
    /// Return (creating if absent) the queue for a key.
    fn queue_for_key(&self, key: &PoolKey) -> Arc<PoolQueue>;

    /// Count a request served straight from the queue.
    fn record_cache_hit(&self, key: &PoolKey);

    /// Count a request that found no reservable queued card.
    fn record_cache_miss(&self, key: &PoolKey);

    /// Count a completed refill that enqueued `added` cards.
    fn record_refill(&self, key: &PoolKey, added: usize);

    /// Count a request that fell back to a direct database draw.
    fn record_fallback_db_hit(&self, key: &PoolKey);

    /// Stats for every key seen so far, sorted by (topic, difficulty,
    /// language) for deterministic output.
    fn snapshot(&self) -> Vec<PoolKeyStats>;
}

/// In-process [`QuestionPoolStore`] backed by a TTL + capacity bounded key
/// cache and lock-free counters.
pub struct InMemoryQuestionPoolStore {
    queues: moka::sync::Cache<PoolKey, Arc<PoolQueue>>,
    counters: DashMap<PoolKey, KeyCounters>,
}

#[derive(Default)]
struct KeyCounters {
    refill_count: AtomicU64,
    fallback_db_hits: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Epoch milliseconds of the last refill; 0 means never.
    last_refill_at_ms: AtomicI64,
}

impl InMemoryQuestionPoolStore {
    /// Create an empty store with the default expiry and capacity bounds.
    pub fn new() -> Self {
        Self {
            queues: moka::sync::Cache::builder()
                .time_to_idle(QUEUE_IDLE_EXPIRY)
                .max_capacity(MAX_TRACKED_KEYS)
                .build(),
            counters: DashMap::new(),
        }
    }

    fn counters_for(&self, key: &PoolKey) -> dashmap::mapref::one::RefMut<'_, PoolKey, KeyCounters> {
        self.counters.entry(key.clone()).or_default()
    }
}

impl Default for InMemoryQuestionPoolStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestionPoolStore for InMemoryQuestionPoolStore {
    fn queue_for_key(&self, key: &PoolKey) -> Arc<PoolQueue> {
        self.counters.entry(key.clone()).or_default();
        self.queues
            .get_with(key.clone(), || Arc::new(PoolQueue::new()))
    }

    fn record_cache_hit(&self, key: &PoolKey) {
        self.counters_for(key)
            .cache_hits
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_cache_miss(&self, key: &PoolKey) {
        self.counters_for(key)
            .cache_misses
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_refill(&self, key: &PoolKey, _added: usize) {
        let counters = self.counters_for(key);
        counters.refill_count.fetch_add(1, Ordering::Relaxed);
        counters
            .last_refill_at_ms
            .store(unix_ms(), Ordering::Relaxed);
    }

    fn record_fallback_db_hit(&self, key: &PoolKey) {
        self.counters_for(key)
            .fallback_db_hits
            .fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Vec<PoolKeyStats> {
        let mut stats: Vec<PoolKeyStats> = self
            .counters
            .iter()
            .map(|entry| {
                let key = entry.key();
                let counters = entry.value();
                let hits = counters.cache_hits.load(Ordering::Relaxed);
                let misses = counters.cache_misses.load(Ordering::Relaxed);
                let hit_rate = if hits + misses == 0 {
                    0.0
                } else {
                    hits as f64 / (hits + misses) as f64
                };

                PoolKeyStats {
                    topic: key.topic().to_owned(),
                    difficulty: key.difficulty().to_owned(),
                    language: key.language().to_owned(),
                    // Read the queue cache directly: taking a counters entry
                    // here would lock the shard the iterator already holds.
                    pool_size: self.queues.get(key).map(|queue| queue.len()).unwrap_or(0),
                    refill_count: counters.refill_count.load(Ordering::Relaxed),
                    last_refill_at: format_ms(counters.last_refill_at_ms.load(Ordering::Relaxed)),
                    fallback_db_hits: counters.fallback_db_hits.load(Ordering::Relaxed),
                    cache_hits: hits,
                    cache_misses: misses,
                    cache_hit_rate: hit_rate,
                }
            })
            .collect();

        stats.sort_by(|a, b| {
            (&a.topic, &a.difficulty, &a.language).cmp(&(&b.topic, &b.difficulty, &b.language))
        });
        stats
    }
}

fn format_ms(ms: i64) -> Option<String> {
    if ms == 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str) -> CardResponse {
        CardResponse {
            id: id.into(),
            card_id: id.into(),
            topic: "history".into(),
            subtopic: None,
            language: "en".into(),
            question: "?".into(),
            options: vec![String::new(); 10],
            correct_index: Some(0),
            difficulty: "2".into(),
            source: "quizdeck-v2".into(),
            created_at: None,
            correct_flags: None,
        }
    }

    fn key() -> PoolKey {
        PoolKey::from_parts("History", "2", Some("EN"))
    }

    #[test]
    fn key_normalization_and_language_default() {
        let key = PoolKey::from_parts("  History ", " EASY", None);
        assert_eq!(key.topic(), "history");
        assert_eq!(key.difficulty(), "easy");
        assert_eq!(key.language(), "en");

        assert_eq!(
            PoolKey::from_parts("history", "easy", Some("  ")),
            PoolKey::from_parts("History", "Easy", None)
        );
    }

    #[test]
    fn queue_is_fifo_and_shared_per_key() {
        let store = InMemoryQuestionPoolStore::new();
        let queue = store.queue_for_key(&key());
        queue.push_back(card("a"));
        queue.push_back(card("b"));

        // Same key resolves to the same queue instance.
        let again = store.queue_for_key(&key());
        assert_eq!(again.len(), 2);
        assert_eq!(again.pop_front().unwrap().id, "a");
        assert_eq!(again.pop_front().unwrap().id, "b");
        assert!(again.pop_front().is_none());
    }

    #[test]
    fn snapshot_reports_counters_and_zero_rate_without_observations() {
        let store = InMemoryQuestionPoolStore::new();
        let k = key();
        store.queue_for_key(&k).push_back(card("a"));
        store.record_cache_hit(&k);
        store.record_cache_hit(&k);
        store.record_cache_miss(&k);
        store.record_refill(&k, 1);
        store.record_fallback_db_hit(&k);

        let quiet = PoolKey::from_parts("sports", "1", None);
        store.queue_for_key(&quiet);

        let stats = store.snapshot();
        assert_eq!(stats.len(), 2);

        let busy = stats.iter().find(|s| s.topic == "history").unwrap();
        assert_eq!(busy.pool_size, 1);
        assert_eq!(busy.cache_hits, 2);
        assert_eq!(busy.cache_misses, 1);
        assert!((busy.cache_hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(busy.refill_count, 1);
        assert_eq!(busy.fallback_db_hits, 1);
        assert!(busy.last_refill_at.is_some());

        let idle = stats.iter().find(|s| s.topic == "sports").unwrap();
        assert_eq!(idle.cache_hit_rate, 0.0);
        assert!(idle.last_refill_at.is_none());
    }

    #[test]
    fn snapshot_is_sorted_by_topic_difficulty_language() {
        let store = InMemoryQuestionPoolStore::new();
        store.queue_for_key(&PoolKey::from_parts("b", "1", Some("en")));
        store.queue_for_key(&PoolKey::from_parts("a", "2", Some("en")));
        store.queue_for_key(&PoolKey::from_parts("a", "1", Some("fr")));
        store.queue_for_key(&PoolKey::from_parts("a", "1", Some("en")));

        let order: Vec<_> = store
            .snapshot()
            .into_iter()
            .map(|s| format!("{}/{}/{}", s.topic, s.difficulty, s.language))
            .collect();
        assert_eq!(order, ["a/1/en", "a/1/fr", "a/2/en", "b/1/en"]);
    }
}
