// src/connectors/er_api.rs
use crate::connectors::messages::ErApiLatest;
use crate::connectors::traits::RateFeed;
use crate::types::{normalize_code, Quotes};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info};

/// Free public exchange-rate API, quoted against one base currency.
pub struct ErApiFeed {
    http_client: Client,
    url: String,
    reference: String,
}

impl ErApiFeed {
    pub fn new(url: &str, reference: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        info!("Rate feed configured: {} (base {})", url, reference);

        Ok(Self {
            http_client,
            url: url.to_string(),
            reference: normalize_code(reference),
        })
    }
}

#[async_trait]
impl RateFeed for ErApiFeed {
    async fn fetch_quotes(&self) -> Result<Quotes> {
        let resp = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Rate request to {} failed", self.url))?
            .error_for_status()?
            .json::<ErApiLatest>()
            .await
            .context("Rate response is not valid JSON")?;

        parse_latest(resp, &self.reference)
    }
}

/// Turns a feed response into quotes, refusing anything the rate table should never see.
pub fn parse_latest(resp: ErApiLatest, reference: &str) -> Result<Quotes> {
    if resp.result != "success" {
        bail!(
            "Rate feed returned {:?} ({})",
            resp.result,
            resp.error_type.as_deref().unwrap_or("no error type")
        );
    }

    if let Some(base) = resp.base_code.as_deref() {
        if normalize_code(base) != reference {
            bail!("Rate feed base {} does not match reference {}", base, reference);
        }
    }

    let mut quotes = Quotes::new();
    for (code, rate) in resp.rates {
        // from_f64 yields None for NaN and infinities.
        let quote = Decimal::from_f64(rate)
            .filter(|q| *q > Decimal::ZERO)
            .ok_or_else(|| anyhow!("Unusable rate {} for {}", rate, code))?;
        quotes.insert(normalize_code(&code), quote);
    }

    debug!(
        "Parsed {} quotes (feed updated at {:?})",
        quotes.len(),
        resp.time_last_update_unix
    );
    Ok(quotes)
}
