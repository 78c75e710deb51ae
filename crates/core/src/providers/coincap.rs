use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::errors::CoreError;
use crate::models::price::PriceQuote;
use super::traits::PriceOracle;

const BASE_URL: &str = "https://api.coincap.io/v2";
const PROVIDER: &str = "CoinCap";

/// CoinCap API oracle for cryptocurrency spot prices.
///
/// - **Free**: No API key required.
/// - **Endpoints**: `/assets/{id}`, `/assets?ids=a,b,c`, `/assets?search={symbol}`
///
/// CoinCap uses lowercase ids like "bitcoin", "ethereum". Common symbols are
/// mapped up front; unknown ones are resolved through the search endpoint
/// and remembered.
pub struct CoinCapOracle {
    client: Client,
    base_url: String,
    /// Uppercase symbol (BTC) to CoinCap asset id (bitcoin).
    symbol_map: Mutex<HashMap<String, String>>,
}

impl CoinCapOracle {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Point the oracle at a different host (mirrors, test servers).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let common = [
            ("BTC", "bitcoin"),
            ("ETH", "ethereum"),
            ("USDT", "tether"),
            ("USDC", "usd-coin"),
            ("BNB", "binance-coin"),
            ("XRP", "xrp"),
            ("ADA", "cardano"),
            ("SOL", "solana"),
            ("DOGE", "dogecoin"),
            ("DOT", "polkadot"),
            ("MATIC", "polygon"),
            ("LTC", "litecoin"),
            ("BCH", "bitcoin-cash"),
            ("AVAX", "avalanche"),
            ("LINK", "chainlink"),
            ("UNI", "uniswap"),
            ("ATOM", "cosmos"),
            ("XLM", "stellar"),
            ("ALGO", "algorand"),
            ("NEAR", "near-protocol"),
            ("FTM", "fantom"),
            ("SHIB", "shiba-inu"),
            ("TRX", "tron"),
            ("DAI", "multi-collateral-dai"),
            ("AAVE", "aave"),
            ("CRO", "crypto-com-coin"),
            ("FIL", "filecoin"),
            ("ICP", "internet-computer"),
            ("ETC", "ethereum-classic"),
            ("HBAR", "hedera-hashgraph"),
            ("VET", "vechain"),
            ("MANA", "decentraland"),
            ("SAND", "the-sandbox"),
            ("XMR", "monero"),
            ("EOS", "eos"),
            ("THETA", "theta"),
            ("XTZ", "tezos"),
            ("EGLD", "elrond-erd-2"),
            ("AXS", "axie-infinity"),
            ("FLOW", "flow"),
            ("ZEC", "zcash"),
        ];
        let symbol_map = common
            .iter()
            .map(|(sym, id)| (sym.to_string(), id.to_string()))
            .collect();

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into(),
            symbol_map: Mutex::new(symbol_map),
        }
    }

    /// The CoinCap id already known for a symbol like "BTC", if any.
    pub fn known_id(&self, symbol: &str) -> Option<String> {
        let map = self.symbol_map.lock().unwrap_or_else(|e| e.into_inner());
        map.get(&symbol.trim().to_uppercase()).cloned()
    }

    /// Resolve through the search endpoint when the symbol is not mapped yet.
    async fn resolve_id_dynamic(&self, symbol: &str) -> Result<String, CoreError> {
        let upper = symbol.trim().to_uppercase();
        if let Some(id) = self.known_id(&upper) {
            return Ok(id);
        }

        let url = format!("{}/assets?search={upper}&limit=5", self.base_url);
        let resp: AssetsResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| api_error(format!("Failed to search for {upper}: {e}")))?;

        let matched = resp
            .data
            .iter()
            .find(|a| a.symbol.to_uppercase() == upper)
            .ok_or_else(|| CoreError::PriceNotAvailable {
                ticker: upper.clone(),
            })?;

        let id = matched.id.clone();
        {
            let mut map = self.symbol_map.lock().unwrap_or_else(|e| e.into_inner());
            map.insert(upper, id.clone());
        }
        Ok(id)
    }
}

impl Default for CoinCapOracle {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a quote from CoinCap's string fields.
///
/// `changePercent24Hr` is relative to the price 24h ago, so the absolute
/// change is `price - price / (1 + pct / 100)`.
pub fn quote_from_fields(
    ticker: &str,
    price_usd: Option<&str>,
    change_pct_24h: Option<&str>,
) -> Result<PriceQuote, CoreError> {
    let price: f64 = price_usd
        .ok_or_else(|| CoreError::PriceNotAvailable {
            ticker: ticker.to_string(),
        })?
        .parse()
        .map_err(|e| api_error(format!("Invalid price format for {ticker}: {e}")))?;

    let pct = change_pct_24h
        .and_then(|p| p.parse::<f64>().ok())
        .filter(|p| p.is_finite() && *p > -100.0)
        .unwrap_or(0.0);
    let previous = price / (1.0 + pct / 100.0);

    Ok(PriceQuote {
        price,
        change_24h: price - previous,
        change_pct_24h: pct,
    })
}

fn api_error(message: String) -> CoreError {
    CoreError::Api {
        provider: PROVIDER.into(),
        message,
    }
}

// ── CoinCap API response types ──────────────────────────────────────

#[derive(Deserialize)]
struct AssetResponse {
    data: AssetData,
}

#[derive(Deserialize)]
struct AssetsResponse {
    data: Vec<AssetData>,
}

#[derive(Deserialize)]
struct AssetData {
    id: String,
    symbol: String,
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
    #[serde(rename = "changePercent24Hr")]
    change_percent_24h: Option<String>,
}

#[async_trait]
impl PriceOracle for CoinCapOracle {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn get_price(&self, ticker: &str) -> Result<PriceQuote, CoreError> {
        let id = self.resolve_id_dynamic(ticker).await?;
        let url = format!("{}/assets/{id}", self.base_url);

        let resp: AssetResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| api_error(format!("Failed to parse response for {ticker}: {e}")))?;

        quote_from_fields(
            ticker,
            resp.data.price_usd.as_deref(),
            resp.data.change_percent_24h.as_deref(),
        )
    }

    async fn get_prices(&self, tickers: &[String]) -> Result<HashMap<String, f64>, CoreError> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }

        // id -> requested ticker, so the response maps back to what was asked
        let mut wanted: HashMap<String, String> = HashMap::new();
        for ticker in tickers {
            match self.resolve_id_dynamic(ticker).await {
                Ok(id) => {
                    wanted.insert(id, ticker.trim().to_uppercase());
                }
                Err(e) => debug!(%ticker, ?e, "coincap: no asset id, skipping"),
            }
        }
        if wanted.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<&str> = wanted.keys().map(String::as_str).collect();
        let url = format!("{}/assets?ids={}", self.base_url, ids.join(","));

        let resp: AssetsResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| api_error(format!("Failed to parse batch response: {e}")))?;

        let mut prices = HashMap::new();
        for asset in resp.data {
            let Some(ticker) = wanted.get(&asset.id) else {
                continue;
            };
            match quote_from_fields(ticker, asset.price_usd.as_deref(), None) {
                Ok(quote) => {
                    prices.insert(ticker.clone(), quote.price);
                }
                Err(e) => debug!(%ticker, ?e, "coincap: skipping unparsable price"),
            }
        }
        Ok(prices)
    }
}
