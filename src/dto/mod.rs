pub mod card;
pub mod health;
pub mod params;
pub mod stats;
pub mod validation;
