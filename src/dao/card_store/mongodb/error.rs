use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures raised by the MongoDB card bank and history backends.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to draw a random card")]
    FindRandomCard {
        #[source]
        source: MongoError,
    },
    #[error("failed to list cards for pool key `{key}`")]
    ListCards {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to count cards for pool key `{key}`")]
    CountCards {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to enumerate pool keys")]
    ListPoolKeys {
        #[source]
        source: MongoError,
    },
    #[error("failed to load deck for language `{language}`")]
    FindDeck {
        language: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to append history for game `{game_id}`")]
    AppendHistory {
        game_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to read history for game `{game_id}`")]
    ReadHistory {
        game_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to evict history for game `{game_id}`")]
    EvictHistory {
        game_id: String,
        #[source]
        source: MongoError,
    },
}
