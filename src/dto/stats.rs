use serde::Serialize;
use utoipa::ToSchema;

/// Per-pool-key cache statistics returned by the stats route.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PoolKeyStats {
    /// Normalized topic component of the pool key.
    pub topic: String,
    /// Normalized difficulty component of the pool key.
    pub difficulty: String,
    /// Normalized language component of the pool key.
    pub language: String,
    /// Current number of queued card projections.
    pub pool_size: usize,
    /// How many refills completed for this key.
    pub refill_count: u64,
    /// RFC 3339 timestamp of the last completed refill, if any.
    pub last_refill_at: Option<String>,
    /// How many requests fell back to a direct database draw.
    pub fallback_db_hits: u64,
    /// Requests served straight from the queue.
    pub cache_hits: u64,
    /// Requests that found no reservable queued card.
    pub cache_misses: u64,
    /// hits / (hits + misses), `0.0` before any observation.
    pub cache_hit_rate: f64,
}
