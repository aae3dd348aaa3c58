pub mod er_api;
pub mod messages;
pub mod traits;
