// src/storage/mod.rs
use crate::connectors::traits::StateSink;
use crate::types::{EngineState, TrendPoint};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Engine balances, positions and history.
pub type JsonStateStore = JsonStore<EngineState>;

/// Price samples behind the trend chart.
pub type TrendStore = JsonStore<Vec<TrendPoint>>;

/// One document kept as a single pretty-printed JSON file.
#[derive(Debug)]
pub struct JsonStore<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonStore<T> {
    fn clone(&self) -> Self {
        Self::new(self.path.clone())
    }
}

impl<T> JsonStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// `Ok(None)` when nothing was saved yet.
    pub async fn load(&self) -> Result<Option<T>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        let doc = serde_json::from_str::<T>(&data)
            .with_context(|| format!("Corrupt file {}", self.path.display()))?;
        info!("Loaded {}", self.path.display());
        Ok(Some(doc))
    }

    /// Writes to a sibling temp file and renames, so a crash never leaves half a file.
    pub async fn save(&self, doc: &T) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let data = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!("Saved {}", self.path.display());
        Ok(())
    }

    /// Persists every document received on `rx` until all senders are gone.
    ///
    /// A failed write is retried `retries` times; documents that queued up in
    /// the meantime replace the one being retried, since each is complete.
    pub fn spawn_writer(
        self,
        mut rx: mpsc::UnboundedReceiver<T>,
        retries: u32,
        retry_delay: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(mut doc) = rx.recv().await {
                let mut attempt = 0;
                loop {
                    while let Ok(newer) = rx.try_recv() {
                        doc = newer;
                    }

                    match self.save(&doc).await {
                        Ok(()) => break,
                        Err(e) if attempt < retries => {
                            attempt += 1;
                            warn!(
                                "Failed to save {} (attempt {}): {:#}",
                                self.path.display(),
                                attempt,
                                e
                            );
                            tokio::time::sleep(retry_delay).await;
                        }
                        Err(e) => {
                            error!(
                                "Giving up on {} after {} retries: {:#}",
                                self.path.display(),
                                retries,
                                e
                            );
                            break;
                        }
                    }
                }
            }
            info!("Writer for {} stopped", self.path.display());
        })
    }
}

/// Engine-side half of the persistence channel.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<EngineState>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<EngineState>) -> Self {
        Self { sender }
    }
}

impl StateSink for ChannelSink {
    fn publish(&self, state: &EngineState) {
        if self.sender.send(state.clone()).is_err() {
            error!("State writer is gone, snapshot not persisted.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HistoryEntry, Position, PositionSide, Side};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn temp_store() -> JsonStateStore {
        JsonStateStore::new(std::env::temp_dir().join(format!(
            "fiskey-test-{}/state.json",
            uuid::Uuid::new_v4()
        )))
    }

    fn sample_state() -> EngineState {
        let now = Utc::now();
        let position = Position {
            id: 7,
            side: PositionSide::Long,
            base_currency: "USD".to_string(),
            quote_currency: "KES".to_string(),
            entry_price: Decimal::new(1565, 1),
            base_amount: Decimal::new(100, 0),
            quote_amount: Decimal::new(15650, 0),
            opened_at: now,
        };
        EngineState {
            balances: [
                ("USD".to_string(), Decimal::new(900, 0)),
                ("KES".to_string(), Decimal::new(15650, 0)),
            ]
            .into_iter()
            .collect(),
            history: vec![HistoryEntry::Execution {
                action: Side::Buy,
                position_id: 7,
                base_currency: "USD".to_string(),
                quote_currency: "KES".to_string(),
                base_amount: position.base_amount,
                quote_amount: position.quote_amount,
                price: position.entry_price,
                at: now,
            }],
            positions: vec![position],
            last_id: 7,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        assert!(temp_store().load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_returns_same_state() {
        let store = temp_store();
        let state = sample_state();

        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let store = temp_store();
        store.save(&EngineState::default()).await.unwrap();
        tokio::fs::write(store.path(), "{not json").await.unwrap();

        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn writer_persists_latest_snapshot() {
        let store = temp_store();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = store
            .clone()
            .spawn_writer(rx, 2, Duration::from_millis(10));

        let latest = sample_state();
        let sink = ChannelSink::new(tx);
        sink.publish(&EngineState::default());
        sink.publish(&latest);
        drop(sink);

        handle.await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(latest));
    }

    #[tokio::test]
    async fn trend_points_survive_a_restart() {
        let store = TrendStore::new(std::env::temp_dir().join(format!(
            "fiskey-test-{}/trend.json",
            uuid::Uuid::new_v4()
        )));
        let points = vec![
            TrendPoint {
                time: Utc::now(),
                rate: Decimal::new(1565, 1),
            },
            TrendPoint {
                time: Utc::now(),
                rate: Decimal::new(1571, 1),
            },
        ];

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = store.clone().spawn_writer(rx, 0, Duration::from_millis(10));
        tx.send(points.clone()).unwrap();
        drop(tx);
        handle.await.unwrap();

        let raw = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert!(raw.contains("\"rate\""));
        assert_eq!(store.load().await.unwrap(), Some(points));
    }
}
