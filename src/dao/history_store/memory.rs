//! Ephemeral in-process game history, used while no durable backend is
//! installed or when configured explicitly.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;

use super::GameHistoryStore;
use crate::dao::models::DeckCardMeta;
use crate::dao::storage::StorageResult;

/// Bounded per-game deques keyed by game id. All operations are in-memory and
/// infallible; the trait's fallible signatures are satisfied with `Ok`.
#[derive(Clone, Default)]
pub struct InMemoryGameHistoryStore {
    by_game: Arc<DashMap<String, VecDeque<DeckCardMeta>>>,
}

impl InMemoryGameHistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_recent_sync(&self, game_id: &str, limit: usize) -> Vec<DeckCardMeta> {
        if limit == 0 {
            return Vec::new();
        }
        let Some(deque) = self.by_game.get(game_id) else {
            return Vec::new();
        };
        let skip = deque.len().saturating_sub(limit);
        deque.iter().skip(skip).cloned().collect()
    }

    fn append_sync(&self, game_id: String, meta: DeckCardMeta, max_size: usize) {
        if max_size == 0 {
            self.by_game.remove(&game_id);
            return;
        }

        let mut deque = self.by_game.entry(game_id).or_default();
        deque.push_back(meta);
        while deque.len() > max_size {
            deque.pop_front();
        }
    }
}

impl GameHistoryStore for InMemoryGameHistoryStore {
    fn read_recent(
        &self,
        game_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<DeckCardMeta>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.read_recent_sync(&game_id, limit)) })
    }

    fn append(
        &self,
        game_id: String,
        meta: DeckCardMeta,
        max_size: usize,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.append_sync(game_id, meta, max_size);
            Ok(())
        })
    }

    fn evict(&self, game_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.by_game.remove(&game_id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::Category;

    fn meta(card_id: &str) -> DeckCardMeta {
        DeckCardMeta {
            card_id: card_id.into(),
            category: Category::Open,
            topic: "history".into(),
        }
    }

    #[tokio::test]
    async fn read_recent_returns_chronological_tail() {
        let store = InMemoryGameHistoryStore::new();
        for id in ["a", "b", "c", "d"] {
            store.append("g1".into(), meta(id), 10).await.unwrap();
        }

        let recent = store.read_recent("g1".into(), 2).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|m| m.card_id.as_str()).collect();
        assert_eq!(ids, ["c", "d"]);
    }

    #[tokio::test]
    async fn append_trims_to_max_size() {
        let store = InMemoryGameHistoryStore::new();
        for id in ["a", "b", "c", "d", "e"] {
            store.append("g1".into(), meta(id), 3).await.unwrap();
        }

        let recent = store.read_recent("g1".into(), 10).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|m| m.card_id.as_str()).collect();
        assert_eq!(ids, ["c", "d", "e"]);
    }

    #[tokio::test]
    async fn zero_max_size_evicts() {
        let store = InMemoryGameHistoryStore::new();
        store.append("g1".into(), meta("a"), 5).await.unwrap();
        store.append("g1".into(), meta("b"), 0).await.unwrap();

        assert!(store.read_recent("g1".into(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn evict_clears_single_game() {
        let store = InMemoryGameHistoryStore::new();
        store.append("g1".into(), meta("a"), 5).await.unwrap();
        store.append("g2".into(), meta("b"), 5).await.unwrap();

        store.evict("g1".into()).await.unwrap();

        assert!(store.read_recent("g1".into(), 10).await.unwrap().is_empty());
        assert_eq!(store.read_recent("g2".into(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_game_reads_empty() {
        let store = InMemoryGameHistoryStore::new();
        assert!(store.read_recent("nope".into(), 10).await.unwrap().is_empty());
    }
}
