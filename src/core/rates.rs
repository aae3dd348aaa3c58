// src/core/rates.rs
use crate::core::error::{EngineError, Result};
use crate::types::{normalize_code, Quotes};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// One immutable set of quotes against the reference currency.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSnapshot {
    reference: String,
    quotes: Quotes,
    as_of: DateTime<Utc>,
}

impl QuoteSnapshot {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn quotes(&self) -> &Quotes {
        &self.quotes
    }

    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    pub fn quote(&self, currency: &str) -> Option<Decimal> {
        self.quotes.get(currency).copied()
    }

    /// Units of `to` per 1 unit of `from`, derived through the reference currency.
    pub fn price_of(&self, from: &str, to: &str) -> Result<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }

        let quote_from = self.positive_quote(from)?;
        let quote_to = self.positive_quote(to)?;

        let price = if from == self.reference {
            Some(quote_to)
        } else if to == self.reference {
            Decimal::ONE.checked_div(quote_from)
        } else {
            Decimal::ONE
                .checked_div(quote_from)
                .and_then(|inverse| inverse.checked_mul(quote_to))
        };

        // A quote so small that the inverse underflows to zero is as useless as a missing one.
        price
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| EngineError::QuoteUnavailable(format!("{}/{}", from, to)))
    }

    fn positive_quote(&self, currency: &str) -> Result<Decimal> {
        self.quote(currency)
            .filter(|q| *q > Decimal::ZERO)
            .ok_or_else(|| EngineError::QuoteUnavailable(currency.to_string()))
    }
}

/// Latest quote snapshot, swapped wholesale on refresh.
pub struct RateTable {
    reference: String,
    current: RwLock<Option<Arc<QuoteSnapshot>>>,
}

impl RateTable {
    pub fn new(reference: &str) -> Self {
        Self {
            reference: normalize_code(reference),
            current: RwLock::new(None),
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Replaces the snapshot. Rejected input leaves the previous snapshot in place.
    pub fn refresh(&self, quotes: Quotes) -> Result<Arc<QuoteSnapshot>> {
        let quotes = match validate_quotes(&self.reference, quotes) {
            Ok(q) => q,
            Err(e) => {
                warn!("Rejected rate refresh: {}", e);
                return Err(e);
            }
        };

        let snapshot = Arc::new(QuoteSnapshot {
            reference: self.reference.clone(),
            quotes,
            as_of: Utc::now(),
        });

        *self.current.write() = Some(snapshot.clone());
        debug!("Rate table refreshed with {} quotes", snapshot.quotes.len());
        Ok(snapshot)
    }

    pub fn snapshot(&self) -> Option<Arc<QuoteSnapshot>> {
        self.current.read().clone()
    }

    pub fn price_of(&self, from: &str, to: &str) -> Result<Decimal> {
        let from = normalize_code(from);
        let to = normalize_code(to);

        if from == to {
            return Ok(Decimal::ONE);
        }

        let snapshot = self
            .snapshot()
            .ok_or_else(|| EngineError::QuoteUnavailable(format!("{} (no rates loaded)", from)))?;
        snapshot.price_of(&from, &to)
    }
}

fn validate_quotes(reference: &str, raw: Quotes) -> Result<Quotes> {
    if raw.is_empty() {
        return Err(EngineError::InvalidQuoteData("empty quote set".to_string()));
    }

    let mut quotes = Quotes::new();
    for (code, quote) in raw {
        let code = normalize_code(&code);
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(EngineError::InvalidQuoteData(format!(
                "malformed currency code {:?}",
                code
            )));
        }
        if quote <= Decimal::ZERO {
            return Err(EngineError::InvalidQuoteData(format!(
                "non-positive quote {} for {}",
                quote, code
            )));
        }
        quotes.insert(code, quote);
    }

    match quotes.get(reference).copied() {
        Some(q) if q != Decimal::ONE => {
            return Err(EngineError::InvalidQuoteData(format!(
                "reference currency {} quoted at {}",
                reference, q
            )));
        }
        Some(_) => {}
        None => {
            quotes.insert(reference.to_string(), Decimal::ONE);
        }
    }

    Ok(quotes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn quotes(pairs: &[(&str, &str)]) -> Quotes {
        pairs.iter().map(|(c, q)| (c.to_string(), dec(q))).collect()
    }

    fn loaded_table() -> RateTable {
        let table = RateTable::new("USD");
        table
            .refresh(quotes(&[
                ("USD", "1"),
                ("KES", "156.5"),
                ("EUR", "0.92"),
                ("JPY", "149.8"),
            ]))
            .unwrap();
        table
    }

    #[test]
    fn same_currency_is_one_even_when_empty() {
        let table = RateTable::new("USD");
        assert_eq!(table.price_of("KES", "KES").unwrap(), Decimal::ONE);
        assert_eq!(loaded_table().price_of("EUR", "eur").unwrap(), Decimal::ONE);
    }

    #[test]
    fn direct_inverse_and_cross_prices() {
        let table = loaded_table();
        assert_eq!(table.price_of("USD", "KES").unwrap(), dec("156.5"));
        assert_eq!(
            table.price_of("KES", "USD").unwrap(),
            Decimal::ONE / dec("156.5")
        );
        let cross = table.price_of("EUR", "KES").unwrap();
        let expected = (Decimal::ONE / dec("0.92")) * dec("156.5");
        assert_eq!(cross, expected);
    }

    #[test]
    fn round_trip_prices_multiply_to_one() {
        let table = loaded_table();
        let codes = ["USD", "KES", "EUR", "JPY"];
        let tolerance = dec("0.000000000001");
        for a in codes {
            for b in codes {
                let product = table.price_of(a, b).unwrap() * table.price_of(b, a).unwrap();
                assert!(
                    (product - Decimal::ONE).abs() < tolerance,
                    "{}/{} round trip gave {}",
                    a,
                    b,
                    product
                );
            }
        }
    }

    #[test]
    fn missing_currency_or_empty_table_is_unavailable() {
        let empty = RateTable::new("USD");
        assert!(matches!(
            empty.price_of("USD", "KES"),
            Err(EngineError::QuoteUnavailable(_))
        ));

        let table = loaded_table();
        assert!(matches!(
            table.price_of("USD", "GBP"),
            Err(EngineError::QuoteUnavailable(_))
        ));
        assert!(matches!(
            table.price_of("GBP", "KES"),
            Err(EngineError::QuoteUnavailable(_))
        ));
    }

    #[test]
    fn rejected_refresh_keeps_previous_snapshot() {
        let table = loaded_table();
        let before = table.snapshot().unwrap();

        assert!(matches!(
            table.refresh(Quotes::new()),
            Err(EngineError::InvalidQuoteData(_))
        ));
        assert!(table
            .refresh(quotes(&[("USD", "1"), ("KES", "0")]))
            .is_err());
        assert!(table
            .refresh(quotes(&[("USD", "2"), ("KES", "150")]))
            .is_err());
        assert!(table.refresh(quotes(&[("K E S", "150")])).is_err());

        assert!(Arc::ptr_eq(&before, &table.snapshot().unwrap()));
        assert_eq!(table.price_of("USD", "KES").unwrap(), dec("156.5"));
    }

    #[test]
    fn refresh_replaces_wholesale_and_adds_reference() {
        let table = loaded_table();
        table.refresh(quotes(&[("kes", "160")])).unwrap();

        let snapshot = table.snapshot().unwrap();
        assert_eq!(snapshot.quote("USD"), Some(Decimal::ONE));
        assert_eq!(snapshot.quote("KES"), Some(dec("160")));
        assert_eq!(snapshot.quote("EUR"), None);
        assert_eq!(snapshot.quotes().len(), 2);
    }
}
