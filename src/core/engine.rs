// src/core/engine.rs
use crate::connectors::traits::StateSink;
use crate::core::error::{EngineError, Result};
use crate::core::rates::RateTable;
use crate::types::{
    normalize_code, Balances, ClosedPosition, EngineState, HistoryEntry, Position, PositionId,
    PositionSide, Side,
};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

/// Engine handle shared by the UI and background tasks. One lock = one critical section.
pub type SharedEngine = Arc<Mutex<TradingEngine>>;

/// Simulated market-order engine over a virtual multi-currency balance.
///
/// Every operation either applies all of its balance, position and history
/// changes or none of them. After each applied change the full state is
/// handed to the configured [`StateSink`].
pub struct TradingEngine {
    rates: Arc<RateTable>,
    balances: Balances,
    positions: Vec<Position>,
    history: VecDeque<HistoryEntry>,
    history_limit: usize,
    last_id: PositionId,
    sink: Option<Box<dyn StateSink>>,
}

impl TradingEngine {
    /// Fresh session: the given balance, no positions, no history.
    pub fn new(
        rates: Arc<RateTable>,
        initial_balance: Balances,
        history_limit: usize,
    ) -> Result<Self> {
        let balances = normalize_balances(initial_balance)?;
        info!("Engine initialized with balances: {:?}", balances);

        Ok(Self {
            rates,
            balances,
            positions: Vec::new(),
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
            last_id: 0,
            sink: None,
        })
    }

    /// Session continued from a persisted state.
    pub fn restore(rates: Arc<RateTable>, state: EngineState, history_limit: usize) -> Result<Self> {
        let balances = normalize_balances(state.balances)?;
        let history_limit = history_limit.max(1);

        let mut positions = Vec::with_capacity(state.positions.len());
        for mut position in state.positions {
            position.base_currency = normalize_code(&position.base_currency);
            position.quote_currency = normalize_code(&position.quote_currency);
            validate_position(&position)?;
            if positions.iter().any(|p: &Position| p.id == position.id) {
                return Err(EngineError::InvalidState(format!(
                    "duplicate position id {}",
                    position.id
                )));
            }
            positions.push(position);
        }

        let mut history: VecDeque<HistoryEntry> = state.history.into_iter().collect();
        while history.len() > history_limit {
            history.pop_front();
        }

        let last_id = positions
            .iter()
            .map(|p| p.id)
            .chain(history.iter().map(HistoryEntry::position_id))
            .fold(state.last_id, PositionId::max);

        info!(
            "Engine restored: {} open positions, {} history entries",
            positions.len(),
            history.len()
        );

        Ok(Self {
            rates,
            balances,
            positions,
            history,
            history_limit,
            last_id,
            sink: None,
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn StateSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    pub fn rates(&self) -> &Arc<RateTable> {
        &self.rates
    }

    pub fn balance(&self, currency: &str) -> Decimal {
        self.balances
            .get(&normalize_code(currency))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn balances(&self) -> &Balances {
        &self.balances
    }

    /// Open positions, oldest first.
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    /// Oldest first, at most `history_limit` entries.
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> + '_ {
        self.history.iter()
    }

    pub fn snapshot(&self) -> EngineState {
        EngineState {
            balances: self.balances.clone(),
            positions: self.positions.clone(),
            history: self.history.iter().cloned().collect(),
            last_id: self.last_id,
        }
    }

    /// Spends `amount` of `funding` at the current cross-rate and opens a position.
    pub fn execute_order(
        &mut self,
        side: Side,
        amount: Decimal,
        funding: &str,
        receiving: &str,
    ) -> Result<Position> {
        let funding = normalize_code(funding);
        let receiving = normalize_code(receiving);

        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidOrder(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        if funding == receiving {
            return Err(EngineError::InvalidOrder(format!(
                "cannot trade {} against itself",
                funding
            )));
        }

        // 1. Price
        let price = self.rates.price_of(&funding, &receiving).map_err(|e| {
            warn!("Order rejected, no price for {}/{}: {}", funding, receiving, e);
            EngineError::PriceUnavailable {
                from: funding.clone(),
                to: receiving.clone(),
            }
        })?;

        // 2. Funds
        let available = self.balance(&funding);
        if available < amount {
            return Err(EngineError::InsufficientBalance {
                currency: funding,
                required: amount,
                available,
            });
        }

        // Full precision amounts; rounding is for display only.
        let received = amount
            .checked_mul(price)
            .ok_or_else(|| EngineError::InvalidOrder("order size overflows".to_string()))?;
        let receiving_after = self
            .balance(&receiving)
            .checked_add(received)
            .ok_or_else(|| EngineError::InvalidOrder("order size overflows".to_string()))?;

        // 3. Apply
        let id = self.next_id()?;
        let now = Utc::now();
        let position = Position {
            id,
            side: side.position_side(),
            base_currency: funding.clone(),
            quote_currency: receiving.clone(),
            entry_price: price,
            base_amount: amount,
            quote_amount: received,
            opened_at: now,
        };

        self.balances.insert(funding.clone(), available - amount);
        self.balances.insert(receiving.clone(), receiving_after);
        self.positions.push(position.clone());
        self.record(HistoryEntry::Execution {
            action: side,
            position_id: position.id,
            base_currency: funding,
            quote_currency: receiving,
            base_amount: amount,
            quote_amount: received,
            price,
            at: now,
        });

        info!(
            "Executed {:?} #{}: {} {} -> {} {} @ {}",
            side,
            position.id,
            position.base_amount,
            position.base_currency,
            position.quote_amount,
            position.quote_currency,
            price
        );

        self.publish();
        Ok(position)
    }

    /// Unwinds an open position at the current price (entry price if none is quoted).
    pub fn close_position(&mut self, id: PositionId) -> Result<ClosedPosition> {
        let index = self
            .positions
            .iter()
            .position(|p| p.id == id)
            .ok_or(EngineError::PositionNotFound(id))?;
        let position = &self.positions[index];

        let (close_price, entry_price_fallback) = match self
            .rates
            .price_of(&position.base_currency, &position.quote_currency)
        {
            Ok(price) => (price, false),
            Err(e) => {
                warn!(
                    "No live price to close #{} ({}), using entry price {}",
                    id, e, position.entry_price
                );
                (position.entry_price, true)
            }
        };

        let held = self.balance(&position.quote_currency);
        if held < position.quote_amount {
            return Err(EngineError::InsufficientBalance {
                currency: position.quote_currency.clone(),
                required: position.quote_amount,
                available: held,
            });
        }

        let credited_amount = match position.side {
            PositionSide::Long => position
                .quote_amount
                .checked_div(close_price)
                .ok_or_else(|| EngineError::PriceUnavailable {
                    from: position.base_currency.clone(),
                    to: position.quote_currency.clone(),
                })?,
            // Shorts hand back the original funding amount regardless of price.
            PositionSide::Short => position.base_amount,
        };
        let funding_after = self
            .balance(&position.base_currency)
            .checked_add(credited_amount)
            .ok_or_else(|| EngineError::InvalidState("balance overflow".to_string()))?;

        let position = self.positions.remove(index);
        self.balances
            .insert(position.quote_currency.clone(), held - position.quote_amount);
        self.balances
            .insert(position.base_currency.clone(), funding_after);
        self.record(HistoryEntry::Close {
            position_id: position.id,
            close_price,
            entry_price_fallback,
            credited_currency: position.base_currency.clone(),
            credited_amount,
            at: Utc::now(),
        });

        info!(
            "Closed {:?} #{} @ {}: credited {} {}",
            position.side, position.id, close_price, credited_amount, position.base_currency
        );

        self.publish();
        Ok(ClosedPosition {
            position,
            close_price,
            entry_price_fallback,
            credited_amount,
        })
    }

    /// Total holdings expressed in `currency`, skipping empty balances.
    pub fn valuation(&self, currency: &str) -> Result<Decimal> {
        let target = normalize_code(currency);
        let mut total = Decimal::ZERO;
        for (code, amount) in &self.balances {
            if amount.is_zero() {
                continue;
            }
            let price = self.rates.price_of(code, &target)?;
            total = amount
                .checked_mul(price)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(|| EngineError::InvalidState("valuation overflow".to_string()))?;
        }
        Ok(total)
    }

    /// Gain or loss in the funding currency if the position were closed now.
    pub fn unrealized_pnl(&self, position: &Position) -> Result<Decimal> {
        match position.side {
            PositionSide::Long => {
                let price = self
                    .rates
                    .price_of(&position.base_currency, &position.quote_currency)?;
                let back = position.quote_amount.checked_div(price).ok_or_else(|| {
                    EngineError::QuoteUnavailable(position.quote_currency.clone())
                })?;
                Ok(back - position.base_amount)
            }
            PositionSide::Short => Ok(Decimal::ZERO),
        }
    }

    /// Time-derived and strictly increasing, even within one millisecond.
    fn next_id(&mut self) -> Result<PositionId> {
        let after = self
            .last_id
            .checked_add(1)
            .ok_or_else(|| EngineError::InvalidState("position ids exhausted".to_string()))?;
        let now = Utc::now().timestamp_millis().max(0) as PositionId;
        self.last_id = now.max(after);
        Ok(self.last_id)
    }

    fn record(&mut self, entry: HistoryEntry) {
        self.history.push_back(entry);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    fn publish(&self) {
        if let Some(sink) = &self.sink {
            sink.publish(&self.snapshot());
        }
    }
}

fn normalize_balances(raw: Balances) -> Result<Balances> {
    let mut balances = Balances::new();
    for (code, amount) in raw {
        let code = normalize_code(&code);
        if code.is_empty() {
            return Err(EngineError::InvalidState("empty currency code".to_string()));
        }
        if amount < Decimal::ZERO {
            return Err(EngineError::InvalidState(format!(
                "negative {} balance {}",
                code, amount
            )));
        }
        *balances.entry(code).or_insert(Decimal::ZERO) += amount;
    }
    Ok(balances)
}

fn validate_position(position: &Position) -> Result<()> {
    let positive = position.entry_price > Decimal::ZERO
        && position.base_amount > Decimal::ZERO
        && position.quote_amount > Decimal::ZERO;
    if !positive || position.base_currency == position.quote_currency {
        return Err(EngineError::InvalidState(format!(
            "malformed position #{}",
            position.id
        )));
    }
    Ok(())
}
