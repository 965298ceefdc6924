//! Cryptocurrency price lookup: CoinGecko first, CoinCap as fallback

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::tool_params;
use crate::tools::Tool;

pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";
pub const COINCAP_API_BASE: &str = "https://api.coincap.io/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP access to both price services
#[derive(Clone)]
pub struct PriceClient {
    http: reqwest::Client,
    coingecko_base: String,
    coincap_base: String,
}

impl PriceClient {
    pub fn new() -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            coingecko_base: COINGECKO_API_BASE.to_string(),
            coincap_base: COINCAP_API_BASE.to_string(),
        })
    }

    pub fn with_base_urls(mut self, coingecko: impl Into<String>, coincap: impl Into<String>) -> Self {
        self.coingecko_base = coingecko.into();
        self.coincap_base = coincap.into();
        self
    }

    async fn coingecko_price(&self, id: &str) -> Option<f64> {
        let url = format!("{}/simple/price", self.coingecko_base);
        let response = self
            .http
            .get(&url)
            .query(&[("ids", id), ("vs_currencies", "usd")])
            .send()
            .await
            .ok()?;

        debug!(status = %response.status(), "CoinGecko response");
        if !response.status().is_success() {
            return None;
        }

        let data: Value = response.json().await.ok()?;
        data[id]["usd"].as_f64()
    }

    async fn coincap_price(&self, id: &str) -> Result<Option<f64>, ToolError> {
        let url = format!("{}/assets/{}", self.coincap_base, id);
        let response = self.http.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::ExecutionFailed(
                    "Request timed out. The price APIs might be experiencing high load.".into(),
                )
            } else {
                ToolError::ExecutionFailed(format!("Network error while fetching price: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::ExecutionFailed(format!(
                "Both APIs failed. CoinCap returned status {}.",
                status.as_u16()
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Invalid CoinCap response: {}", e)))?;

        // CoinCap reports prices as decimal strings
        Ok(data["data"]["priceUsd"]
            .as_str()
            .and_then(|p| p.parse::<f64>().ok()))
    }
}

/// Current USD price of a cryptocurrency
pub struct GetCryptoPrice {
    prices: PriceClient,
}

impl GetCryptoPrice {
    pub fn new(prices: PriceClient) -> Self {
        Self { prices }
    }
}

#[async_trait]
impl Tool for GetCryptoPrice {
    fn name(&self) -> &str {
        "get_crypto_price"
    }

    fn description(&self) -> &str {
        "Get the current price of a cryptocurrency."
    }

    fn parameters_schema(&self) -> Value {
        tool_params!(symbol: "string" => "The cryptocurrency symbol (e.g., bitcoin, ethereum, solana)")
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let symbol = params["symbol"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidParams("symbol is required".into()))?;

        let id = symbol.to_lowercase();
        let label = symbol.to_uppercase();

        if let Some(price) = self.prices.coingecko_price(&id).await {
            return Ok(Value::String(format!(
                "Current price of {}: ${} USD (via CoinGecko)",
                label,
                format_usd(price)
            )));
        }

        warn!(symbol = %id, "CoinGecko lookup failed, trying CoinCap");
        match self.prices.coincap_price(coincap_id(&id)).await? {
            Some(price) => Ok(Value::String(format!(
                "Current price of {}: ${} USD (via CoinCap)",
                label,
                format_usd(price)
            ))),
            None => Err(ToolError::ExecutionFailed(format!(
                "Could not find price for {} on either API. Make sure you're using a valid cryptocurrency symbol.",
                label
            ))),
        }
    }
}

/// CoinCap asset ids that differ from the common name
fn coincap_id(symbol: &str) -> &str {
    match symbol {
        "bnb" | "binancecoin" => "binance-coin",
        other => other,
    }
}

/// Two decimals with thousands separators, e.g. `67,234.50`
fn format_usd(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, cents)
}
