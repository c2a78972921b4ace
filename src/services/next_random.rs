//! Deck-based selection for live multi-round games: avoids repeating the
//! previous category and topic and any recently served card, relaxing those
//! constraints in a fixed order when the deck runs out of fresh candidates.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rand::seq::IndexedRandom;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::dao::card_store::CardStore;
use crate::dao::history_store::GameHistoryStore;
use crate::dao::models::{CardEntity, DeckCardMeta};
use crate::error::ServiceError;
use crate::services::unix_ms;

/// History window consulted for recent-card exclusion.
pub const LAST_K_DEFAULT: usize = 20;

/// Content sources trusted for deck-based selection. Cards from legacy
/// sources never enter the deck.
const ALLOWED_SOURCES: [&str; 3] = ["quizdeck-v2", "quizdeck-human", "quizdeck-verified"];

/// Language retried when the requested language yields an empty deck.
const FALLBACK_LANGUAGE: &str = "en";

const MAX_TRACKED_GAMES: usize = 10_000;
const GAME_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Serves the next card for a live game, tracking per-game recent history and
/// evicting idle games together with their history.
#[derive(Clone)]
pub struct NextRandomCardService {
    games: Arc<DashMap<String, Arc<GameEntry>>>,
    last_cleanup_ms: Arc<AtomicI64>,
    game_ttl: Duration,
    cleanup_interval: Duration,
    max_tracked_games: usize,
}

struct GameEntry {
    last_access_ms: AtomicI64,
    /// Serializes selection for one game; distinct games never contend.
    selection: Mutex<()>,
}

impl GameEntry {
    fn new() -> Self {
        Self {
            last_access_ms: AtomicI64::new(unix_ms()),
            selection: Mutex::new(()),
        }
    }
}

impl NextRandomCardService {
    /// Create the service with the default TTL, sweep interval, and cap.
    pub fn new() -> Self {
        Self::with_limits(GAME_TTL, CLEANUP_INTERVAL, MAX_TRACKED_GAMES)
    }

    fn with_limits(game_ttl: Duration, cleanup_interval: Duration, max_tracked_games: usize) -> Self {
        Self {
            games: Arc::new(DashMap::new()),
            last_cleanup_ms: Arc::new(AtomicI64::new(0)),
            game_ttl,
            cleanup_interval,
            max_tracked_games,
        }
    }

    /// Select the next card for a game.
    ///
    /// Requires a language and game id. The eligible deck is filtered by
    /// language, optional topic, and the trusted source allow-list; when the
    /// requested language has no eligible cards the deck query is retried in
    /// English before failing.
    pub async fn next_random(
        &self,
        card_store: Arc<dyn CardStore>,
        history_store: Arc<dyn GameHistoryStore>,
        language: Option<&str>,
        game_id: Option<&str>,
        topic: Option<&str>,
    ) -> Result<CardEntity, ServiceError> {
        let language = normalize_required(language, "language")?.to_lowercase();
        let game_id = normalize_required(game_id, "gameId")?;
        let topic = normalize_optional(topic);

        self.maybe_cleanup(&history_store).await;

        let sources: Vec<String> = ALLOWED_SOURCES.iter().map(|s| (*s).to_owned()).collect();
        let mut deck = card_store
            .find_deck(language.clone(), topic.clone(), sources.clone())
            .await?;
        if deck.is_empty() && language != FALLBACK_LANGUAGE {
            info!(
                language = %language,
                "deck empty for requested language; retrying in {FALLBACK_LANGUAGE}"
            );
            deck = card_store
                .find_deck(FALLBACK_LANGUAGE.to_owned(), topic.clone(), sources)
                .await?;
        }
        if deck.is_empty() {
            let topic_part = topic.as_deref().unwrap_or("any");
            return Err(ServiceError::NotFound(format!(
                "no cards available for language={language}, topic={topic_part}"
            )));
        }

        let entry = self
            .games
            .entry(game_id.clone())
            .or_insert_with(|| Arc::new(GameEntry::new()))
            .clone();
        let _selection = entry.selection.lock().await;
        entry.last_access_ms.store(unix_ms(), Ordering::Relaxed);

        let history = history_store
            .read_recent(game_id.clone(), LAST_K_DEFAULT)
            .await?;
        let last = history.last().cloned();
        let recent_ids: HashSet<String> =
            history.into_iter().map(|meta| meta.card_id).collect();

        let mut relaxed = Vec::new();
        let selected = pick_with_relaxation(&deck, last.as_ref(), &recent_ids, &mut relaxed);

        history_store
            .append(
                game_id.clone(),
                DeckCardMeta {
                    card_id: selected.id.clone(),
                    category: selected.resolved_category(),
                    topic: selected.topic.clone(),
                },
                LAST_K_DEFAULT,
            )
            .await?;

        info!(
            game_id = %game_id,
            card_id = %selected.id,
            category = %selected.resolved_category(),
            topic = %selected.topic,
            deck = deck.len(),
            relaxed = ?relaxed,
            "selected next random card"
        );

        Ok(selected)
    }

    /// Opportunistic idle-game sweep, at most once per interval.
    ///
    /// The timestamp check is deliberately not atomic: two concurrent callers
    /// observing a stale stamp may both sweep, which is idempotent.
    async fn maybe_cleanup(&self, history_store: &Arc<dyn GameHistoryStore>) {
        let now = unix_ms();
        if now - self.last_cleanup_ms.load(Ordering::Relaxed)
            < self.cleanup_interval.as_millis() as i64
        {
            return;
        }
        self.last_cleanup_ms.store(now, Ordering::Relaxed);

        let ttl_ms = self.game_ttl.as_millis() as i64;
        let expired: Vec<String> = self
            .games
            .iter()
            .filter(|entry| now - entry.value().last_access_ms.load(Ordering::Relaxed) > ttl_ms)
            .map(|entry| entry.key().clone())
            .collect();
        for game_id in expired {
            self.evict_game(&game_id, history_store).await;
        }

        let overflow = self.games.len().saturating_sub(self.max_tracked_games);
        if overflow == 0 {
            return;
        }

        let mut by_age: Vec<(String, i64)> = self
            .games
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().last_access_ms.load(Ordering::Relaxed),
                )
            })
            .collect();
        by_age.sort_by_key(|(_, last_access)| *last_access);
        for (game_id, _) in by_age.into_iter().take(overflow) {
            self.evict_game(&game_id, history_store).await;
        }
    }

    /// Drop a game's state and its history together.
    async fn evict_game(&self, game_id: &str, history_store: &Arc<dyn GameHistoryStore>) {
        self.games.remove(game_id);
        if let Err(err) = history_store.evict(game_id.to_owned()).await {
            warn!(game_id = %game_id, error = %err, "failed to evict game history");
        }
    }
}

impl Default for NextRandomCardService {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick a card from the deck under progressively relaxed constraints.
///
/// Tiers, in order: exclude last category + last topic + recent ids; drop the
/// recent-id exclusion; drop the topic exclusion; take the full deck. Each
/// relaxation pushes the name of the dropped constraint onto `relaxed`.
/// Selection within the first non-empty tier is uniform.
fn pick_with_relaxation(
    deck: &[CardEntity],
    last: Option<&DeckCardMeta>,
    recent_ids: &HashSet<String>,
    relaxed: &mut Vec<&'static str>,
) -> CardEntity {
    let strict = apply_constraints(deck, last, recent_ids, true, true, true);
    if let Some(card) = random_card(&strict) {
        return card;
    }

    relaxed.push("cardId");
    let without_recent = apply_constraints(deck, last, recent_ids, true, true, false);
    if let Some(card) = random_card(&without_recent) {
        return card;
    }

    relaxed.push("topic");
    let without_topic = apply_constraints(deck, last, recent_ids, true, false, false);
    if let Some(card) = random_card(&without_topic) {
        return card;
    }

    relaxed.push("category");
    let full: Vec<&CardEntity> = deck.iter().collect();
    random_card(&full).unwrap_or_else(|| deck[0].clone())
}

fn apply_constraints<'a>(
    deck: &'a [CardEntity],
    last: Option<&DeckCardMeta>,
    recent_ids: &HashSet<String>,
    enforce_category: bool,
    enforce_topic: bool,
    enforce_card_id: bool,
) -> Vec<&'a CardEntity> {
    deck.iter()
        .filter(|card| {
            if enforce_category
                && last.is_some_and(|last| card.resolved_category() == last.category)
            {
                return false;
            }
            if enforce_topic
                && last.is_some_and(|last| card.topic.eq_ignore_ascii_case(&last.topic))
            {
                return false;
            }
            if enforce_card_id && recent_ids.contains(&card.id) {
                return false;
            }
            true
        })
        .collect()
}

fn random_card(candidates: &[&CardEntity]) -> Option<CardEntity> {
    candidates.choose(&mut rand::rng()).map(|card| (*card).clone())
}

fn normalize_required(value: Option<&str>, field: &str) -> Result<String, ServiceError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ServiceError::InvalidInput(format!("{field} is required")))
}

fn normalize_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_lowercase)
}
