/// Read-only adapter over the card content bank.
pub mod card_store;
/// Per-game serving history storage.
pub mod history_store;
/// Database model definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
