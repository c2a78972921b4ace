//! Per-session tracking of served card ids, bounding memory with a TTL and a
//! maximum session count.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;

use crate::config::SessionConfig;

/// Tracks which card ids have already been served to each session.
///
/// The per-session sets live in a write-expiring, capacity-bounded cache;
/// sessions beyond the capacity are evicted oldest-first. Each set supports
/// the atomic insert-returns-whether-new primitive used as the reservation
/// gate by the question pool service.
#[derive(Clone)]
pub struct SessionCardTracker {
    enabled: bool,
    sessions: moka::sync::Cache<String, Arc<DashSet<String>>>,
}

impl SessionCardTracker {
    /// Build a tracker from the session dedup configuration.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            enabled: config.enabled,
            sessions: moka::sync::Cache::builder()
                .time_to_live(Duration::from_secs(config.ttl_minutes * 60))
                .max_capacity(config.max_sessions)
                .build(),
        }
    }

    fn set_for(&self, session_id: Option<&str>) -> Option<Arc<DashSet<String>>> {
        if !self.enabled {
            return None;
        }
        let session_id = session_id.map(str::trim).filter(|id| !id.is_empty())?;
        Some(
            self.sessions
                .get_with(session_id.to_owned(), || Arc::new(DashSet::new())),
        )
    }

    /// Whether a card was already served to the session. Always `false` when
    /// dedup is disabled or the session id is blank.
    pub fn is_served(&self, session_id: Option<&str>, card_id: &str) -> bool {
        self.set_for(session_id)
            .is_some_and(|set| set.contains(card_id))
    }

    /// Copy of the session's served ids, for database exclusion filters.
    pub fn served_ids(&self, session_id: Option<&str>) -> HashSet<String> {
        self.set_for(session_id)
            .map(|set| set.iter().map(|id| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Atomically mark a card as served to the session.
    ///
    /// Returns `true` when the id was genuinely inserted (the reservation
    /// succeeded) and `false` when it was already present. Unconditionally
    /// `true` when dedup is disabled or the session id is blank.
    pub fn try_mark_served(&self, session_id: Option<&str>, card_id: &str) -> bool {
        match self.set_for(session_id) {
            Some(set) => set.insert(card_id.to_owned()),
            None => true,
        }
    }
}
