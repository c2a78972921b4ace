#[cfg(feature = "mongo-store")]
pub mod mongodb;

pub mod memory;

use futures::future::BoxFuture;

use crate::dao::models::DeckCardMeta;
use crate::dao::storage::StorageResult;

/// Rolling per-game history of recently served cards.
///
/// Implementations keep at most `max_size` entries per game and return recent
/// entries in chronological order (oldest first).
pub trait GameHistoryStore: Send + Sync {
    /// Read up to `limit` most-recent entries for a game, oldest first.
    fn read_recent(
        &self,
        game_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<DeckCardMeta>>>;

    /// Append a served-card entry and trim the game's history to `max_size`.
    fn append(
        &self,
        game_id: String,
        meta: DeckCardMeta,
        max_size: usize,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Remove all history for a game.
    fn evict(&self, game_id: String) -> BoxFuture<'static, StorageResult<()>>;
}
