use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use axum_valid::Valid;

use crate::{
    dto::{
        card::CardResponse,
        params::{NextCardParams, NextRandomParams},
        stats::PoolKeyStats,
    },
    error::AppError,
    state::SharedState,
};

/// Routes serving cards and pool observability.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/cards/next", get(next_card))
        .route("/api/cards/next-random", get(next_random_card))
        .route("/api/pool/stats", get(pool_stats))
}

/// Serve the next card for a (topic, difficulty, language) key, preferring
/// the pre-fetched pool and falling back to a direct database draw.
#[utoipa::path(
    get,
    path = "/api/cards/next",
    tag = "cards",
    params(NextCardParams),
    responses(
        (status = 200, description = "Next card for the requested key", body = CardResponse),
        (status = 404, description = "No card matches the requested filters"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn next_card(
    State(state): State<SharedState>,
    Valid(Query(params)): Valid<Query<NextCardParams>>,
) -> Result<Json<CardResponse>, AppError> {
    let card_store = state.require_card_store().await?;
    let card = state
        .pool()
        .next_card(
            card_store,
            Some(&params.topic),
            Some(&params.difficulty),
            params.lang.as_deref(),
            params.session_id.as_deref(),
        )
        .await?;
    Ok(Json(card))
}

/// Serve the next card for a live game, avoiding recent repeats of card,
/// topic, and category.
#[utoipa::path(
    get,
    path = "/api/cards/next-random",
    tag = "cards",
    params(NextRandomParams),
    responses(
        (status = 200, description = "Next card for the game", body = CardResponse),
        (status = 400, description = "Missing language or game id"),
        (status = 404, description = "No card matches the requested filters"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn next_random_card(
    State(state): State<SharedState>,
    Valid(Query(params)): Valid<Query<NextRandomParams>>,
) -> Result<Json<CardResponse>, AppError> {
    let card_store = state.require_card_store().await?;
    let history_store = state.history_store().await;
    let card = state
        .deck()
        .next_random(
            card_store,
            history_store,
            params.lang.as_deref(),
            params.game_id.as_deref(),
            params.topic.as_deref(),
        )
        .await?;
    Ok(Json(CardResponse::from(card)))
}

/// Report per-key pool sizes and counters.
#[utoipa::path(
    get,
    path = "/api/pool/stats",
    tag = "pool",
    responses(
        (status = 200, description = "Per-key pool statistics", body = [PoolKeyStats])
    )
)]
pub async fn pool_stats(State(state): State<SharedState>) -> Json<Vec<PoolKeyStats>> {
    Json(state.pool().stats())
}
