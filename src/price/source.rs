//! Price Source client.
//!
//! The upstream endpoint returns the latest administered override price for a
//! canonical instrument symbol. A missing price is a valid response, not an
//! error; network failures bubble up as errors and are swallowed by the
//! polling loop.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::models::PriceQuote;

/// Map a user-facing ticker to the Price Source's canonical key. Unknown
/// tickers pass through unchanged as a best-effort fallback.
pub fn canonical_symbol(ticker: &str) -> String {
    let upper = ticker.to_uppercase();
    match upper.as_str() {
        "BTC" => "BTC-USD".to_string(),
        "ETH" => "ETH-USD".to_string(),
        "SOL" => "SOL-USD".to_string(),
        "XRP" => "XRP-USD".to_string(),
        "GOLD" => "XAU-USD".to_string(),
        "SILVER" => "XAG-USD".to_string(),
        "OIL" => "WTI-USD".to_string(),
        _ => upper,
    }
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Latest known price for a canonical symbol.
    async fn latest_price(&self, symbol: &str) -> Result<PriceQuote>;
}

/// HTTP implementation against the administered price endpoint.
pub struct HttpPriceSource {
    client: Client,
    base_url: String,
}

impl HttpPriceSource {
    pub fn new(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn latest_price(&self, symbol: &str) -> Result<PriceQuote> {
        let url = format!("{}/prices/{}", self.base_url, symbol);

        let quote = self
            .client
            .get(&url)
            .send()
            .await
            .context("price request failed")?
            .error_for_status()
            .context("price endpoint returned an error status")?
            .json::<PriceQuote>()
            .await
            .context("failed to parse price response")?;

        Ok(quote)
    }
}
