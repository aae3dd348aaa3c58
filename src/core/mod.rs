pub mod engine;
pub mod error;
pub mod rates;
pub mod refresher;
