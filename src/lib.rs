// src/lib.rs
pub mod config;
pub mod connectors;
pub mod core;
pub mod storage;
pub mod tui;
pub mod types;
pub mod utils;
