use crate::types::{EngineState, Quotes};
use anyhow::Result;
use async_trait::async_trait;

/// Source of quote snapshots against the reference currency.
#[async_trait]
pub trait RateFeed: Send + Sync {
    async fn fetch_quotes(&self) -> Result<Quotes>;
}

/// Receives the full engine state after every successful mutation.
/// Implementations must not block and must not fail the caller.
pub trait StateSink: Send + Sync {
    fn publish(&self, state: &EngineState);
}
