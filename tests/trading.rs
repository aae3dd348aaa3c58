//! End-to-end engine scenarios: rate table + engine + JSON persistence.

use fiskey::core::engine::TradingEngine;
use fiskey::core::error::EngineError;
use fiskey::core::rates::RateTable;
use fiskey::storage::{ChannelSink, JsonStateStore};
use fiskey::types::{Balances, HistoryEntry, PositionSide, Quotes, Side};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn table(pairs: &[(&str, &str)]) -> Arc<RateTable> {
    let table = RateTable::new("USD");
    table.refresh(map(pairs)).unwrap();
    Arc::new(table)
}

fn map(pairs: &[(&str, &str)]) -> Quotes {
    pairs.iter().map(|(c, v)| (c.to_string(), dec(v))).collect()
}

fn temp_store() -> JsonStateStore {
    JsonStateStore::new(
        std::env::temp_dir().join(format!("fiskey-it-{}.json", uuid::Uuid::new_v4())),
    )
}

#[test]
fn buy_then_close_round_trip() {
    let rates = table(&[("USD", "1"), ("KES", "156.5")]);
    let balances: Balances = map(&[("USD", "1000"), ("KES", "0")]);
    let mut engine = TradingEngine::new(rates, balances, 200).unwrap();

    let position = engine
        .execute_order(Side::Buy, dec("100"), "USD", "KES")
        .unwrap();
    assert_eq!(position.side, PositionSide::Long);
    assert_eq!(position.entry_price, dec("156.5"));
    assert_eq!(engine.balance("USD"), dec("900"));
    assert_eq!(engine.balance("KES"), dec("15650"));

    engine.close_position(position.id).unwrap();
    assert_eq!(engine.balance("USD"), dec("1000"));
    assert_eq!(engine.balance("KES"), Decimal::ZERO);
    assert!(engine.positions().is_empty());

    let history: Vec<&HistoryEntry> = engine.history().collect();
    assert_eq!(history.len(), 2);
    assert!(matches!(history[1], HistoryEntry::Close { position_id, .. } if *position_id == position.id));
}

#[test]
fn empty_refresh_keeps_pricing_orders() {
    let rates = table(&[("USD", "1"), ("KES", "156.5")]);
    let mut engine =
        TradingEngine::new(rates.clone(), map(&[("USD", "10")]), 200).unwrap();

    assert!(matches!(
        rates.refresh(Quotes::new()),
        Err(EngineError::InvalidQuoteData(_))
    ));

    let position = engine
        .execute_order(Side::Buy, dec("10"), "USD", "KES")
        .unwrap();
    assert_eq!(position.entry_price, dec("156.5"));
}

#[test]
fn orders_before_first_refresh_are_rejected() {
    let rates = Arc::new(RateTable::new("USD"));
    let mut engine = TradingEngine::new(rates, map(&[("USD", "10")]), 200).unwrap();

    assert!(matches!(
        engine.execute_order(Side::Buy, dec("1"), "USD", "KES"),
        Err(EngineError::PriceUnavailable { .. })
    ));
    assert_eq!(engine.balance("USD"), dec("10"));
}

#[tokio::test]
async fn persisted_session_resumes() {
    let store = temp_store();
    let rates = table(&[("USD", "1"), ("KES", "156.5"), ("EUR", "0.92")]);
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = store
        .clone()
        .spawn_writer(rx, 1, Duration::from_millis(10));

    let mut engine = TradingEngine::new(rates.clone(), map(&[("USD", "1000")]), 200)
        .unwrap()
        .with_sink(Box::new(ChannelSink::new(tx)));
    let kept = engine
        .execute_order(Side::Buy, dec("250"), "USD", "EUR")
        .unwrap();
    let closed = engine
        .execute_order(Side::Buy, dec("100"), "USD", "KES")
        .unwrap();
    engine.close_position(closed.id).unwrap();
    let expected = engine.snapshot();
    drop(engine);
    writer.await.unwrap();

    let state = store.load().await.unwrap().expect("state was written");
    assert_eq!(state, expected);

    let mut resumed = TradingEngine::restore(rates, state, 200).unwrap();
    assert_eq!(resumed.positions().len(), 1);
    assert_eq!(resumed.positions()[0].id, kept.id);
    assert_eq!(resumed.balance("EUR"), dec("230"));

    let next = resumed
        .execute_order(Side::Sell, dec("30"), "USD", "KES")
        .unwrap();
    assert!(next.id > closed.id);
    resumed.close_position(kept.id).unwrap();
    assert_eq!(resumed.balance("EUR"), Decimal::ZERO);
    assert_eq!(resumed.balance("USD"), dec("970"));
}
