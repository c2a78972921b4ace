#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;

use crate::dao::models::{CardEntity, PoolKeyParts};
use crate::dao::storage::StorageResult;

/// Optional bank filters for a single random draw. Values are expected to be
/// normalized (trimmed, lowercased) by the caller.
#[derive(Debug, Clone, Default)]
pub struct CardQueryFilter {
    pub topic: Option<String>,
    pub difficulty: Option<String>,
    pub language: Option<String>,
}

/// Read-only abstraction over the card content bank.
///
/// The bank stores topic, difficulty, language, and source values lowercased;
/// all filter arguments must be lowercased the same way.
pub trait CardStore: Send + Sync {
    /// Draw one uniformly random card matching the filters, skipping any of
    /// `excluded_ids`.
    fn find_random(
        &self,
        filter: CardQueryFilter,
        excluded_ids: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<Option<CardEntity>>>;

    /// Fetch every card matching the exact pool key, for refills.
    fn find_all_by_pool_key(
        &self,
        topic: String,
        difficulty: String,
        language: String,
    ) -> BoxFuture<'static, StorageResult<Vec<CardEntity>>>;

    /// Count cards matching the exact pool key, for bank-size checks.
    fn count_by_pool_key(
        &self,
        topic: String,
        difficulty: String,
        language: String,
    ) -> BoxFuture<'static, StorageResult<u64>>;

    /// Enumerate every distinct (topic, difficulty, language) tuple present
    /// in the bank, for cache warmup.
    fn find_all_pool_keys(&self) -> BoxFuture<'static, StorageResult<Vec<PoolKeyParts>>>;

    /// Fetch the eligible deck for a random-game draw: language match,
    /// optional topic match, source within the allow-list.
    fn find_deck(
        &self,
        language: String,
        topic: Option<String>,
        allowed_sources: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<Vec<CardEntity>>>;

    /// Verify the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
