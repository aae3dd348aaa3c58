// src/core/refresher.rs
use crate::connectors::traits::RateFeed;
use crate::core::rates::{QuoteSnapshot, RateTable};
use crate::types::{TrendPoint, UiEvent};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Pair whose price is sampled for the trend chart on every refresh.
#[derive(Debug, Clone)]
pub struct TrackedPair {
    pub from: String,
    pub to: String,
}

/// One fetch + refresh. A failed fetch or rejected snapshot keeps the old one.
pub async fn refresh_once(feed: &dyn RateFeed, table: &RateTable) -> Result<Arc<QuoteSnapshot>> {
    let quotes = feed.fetch_quotes().await?;
    Ok(table.refresh(quotes)?)
}

pub fn trend_point(snapshot: &QuoteSnapshot, pair: &TrackedPair) -> Option<TrendPoint> {
    snapshot
        .price_of(&pair.from, &pair.to)
        .ok()
        .map(|rate| TrendPoint {
            time: snapshot.as_of(),
            rate,
        })
}

/// Refreshes `table` on a fixed interval, first tick immediately.
pub fn spawn(
    feed: Box<dyn RateFeed>,
    table: Arc<RateTable>,
    every: Duration,
    pair: TrackedPair,
    ui_sender: mpsc::Sender<UiEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Rate refresher running every {:?}", every);

        loop {
            ticker.tick().await;

            let event = match refresh_once(feed.as_ref(), &table).await {
                Ok(snapshot) => UiEvent::RatesRefreshed(trend_point(&snapshot, &pair)),
                Err(e) => {
                    warn!("Rate refresh failed, keeping previous rates: {:#}", e);
                    UiEvent::FeedError(format!("Unable to fetch rates: {}", e))
                }
            };

            match ui_sender.try_send(event) {
                Ok(_) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    error!("UI channel closed, stopping rate refresher.");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quotes;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    struct ScriptedFeed(Mutex<Vec<Result<Quotes>>>);

    #[async_trait]
    impl RateFeed for ScriptedFeed {
        async fn fetch_quotes(&self) -> Result<Quotes> {
            self.0.lock().remove(0)
        }
    }

    fn kes(rate: i64) -> Quotes {
        [("USD".to_string(), Decimal::ONE), ("KES".to_string(), Decimal::new(rate, 1))]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn failed_fetch_and_empty_refresh_keep_stale_rates() {
        let feed = ScriptedFeed(Mutex::new(vec![
            Ok(kes(1565)),
            Err(anyhow!("connection reset")),
            Ok(Quotes::new()),
        ]));
        let table = RateTable::new("USD");

        refresh_once(&feed, &table).await.unwrap();
        assert!(refresh_once(&feed, &table).await.is_err());
        assert!(refresh_once(&feed, &table).await.is_err());

        assert_eq!(table.price_of("USD", "KES").unwrap(), Decimal::new(1565, 1));
    }

    #[tokio::test]
    async fn spawned_refresher_reports_trend_points() {
        let feed = ScriptedFeed(Mutex::new(vec![Ok(kes(1565))]));
        let table = Arc::new(RateTable::new("USD"));
        let (tx, mut rx) = mpsc::channel(4);
        let pair = TrackedPair {
            from: "USD".to_string(),
            to: "KES".to_string(),
        };

        let handle = spawn(Box::new(feed), table.clone(), Duration::from_secs(3600), pair, tx);

        match rx.recv().await {
            Some(UiEvent::RatesRefreshed(Some(point))) => {
                assert_eq!(point.rate, Decimal::new(1565, 1))
            }
            other => panic!("unexpected event: {:?}", other),
        }
        handle.abort();
    }
}
