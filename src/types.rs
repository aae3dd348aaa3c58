// src/types.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Units of each currency per 1 unit of the reference currency.
pub type Quotes = BTreeMap<String, Decimal>;

/// Virtual holdings per currency.
pub type Balances = BTreeMap<String, Decimal>;

pub type PositionId = u64;

/// Currency codes are compared upper-cased and trimmed everywhere.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn position_side(self) -> PositionSide {
        match self {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

/// An open simulated trade. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: PositionId,
    pub side: PositionSide,
    /// Funding currency, debited at open.
    pub base_currency: String,
    /// Receiving currency, credited at open.
    pub quote_currency: String,
    pub entry_price: Decimal,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum HistoryEntry {
    #[serde(rename_all = "camelCase")]
    Execution {
        action: Side,
        position_id: PositionId,
        base_currency: String,
        quote_currency: String,
        base_amount: Decimal,
        quote_amount: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Close {
        position_id: PositionId,
        close_price: Decimal,
        /// Set when no live quote existed and the entry price was used instead.
        entry_price_fallback: bool,
        credited_currency: String,
        credited_amount: Decimal,
        at: DateTime<Utc>,
    },
}

impl HistoryEntry {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            HistoryEntry::Execution { at, .. } | HistoryEntry::Close { at, .. } => *at,
        }
    }

    pub fn position_id(&self) -> PositionId {
        match self {
            HistoryEntry::Execution { position_id, .. }
            | HistoryEntry::Close { position_id, .. } => *position_id,
        }
    }
}

/// Result of a successful close, handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub position: Position,
    pub close_price: Decimal,
    pub entry_price_fallback: bool,
    pub credited_amount: Decimal,
}

/// Everything the persistence layer stores and restores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub balances: Balances,
    pub positions: Vec<Position>,
    /// Oldest first.
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub last_id: PositionId,
}

/// One sample of the tracked pair's price, persisted alongside the engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub time: DateTime<Utc>,
    pub rate: Decimal,
}

// --- TUI events ---

#[derive(Debug, Clone)]
pub enum UiEvent {
    /// A refresh landed; carries the tracked pair price if it could be derived.
    RatesRefreshed(Option<TrendPoint>),
    FeedError(String),
    Log(String),
}
