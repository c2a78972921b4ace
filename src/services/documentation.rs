use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Quizdeck Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::cards::next_card,
        crate::routes::cards::next_random_card,
        crate::routes::cards::pool_stats,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::card::CardResponse,
            crate::dto::stats::PoolKeyStats,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "cards", description = "Card serving endpoints"),
        (name = "pool", description = "Question pool observability"),
    )
)]
pub struct ApiDoc;
