/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Deck-based next-random card selection with anti-repetition.
pub mod next_random;
/// Per-key pool cache and counters.
pub mod pool_store;
/// Pooled card serving with async refill and database fallback.
pub mod question_pool;
/// Per-session served-card tracking.
pub mod session_tracker;

use time::OffsetDateTime;

/// Current time as epoch milliseconds.
pub(crate) fn unix_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
