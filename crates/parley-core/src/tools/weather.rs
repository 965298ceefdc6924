//! Weather tools backed by the US National Weather Service API

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::ToolError;
use crate::tool_params;
use crate::tools::Tool;

pub const NWS_API_BASE: &str = "https://api.weather.gov";
const USER_AGENT: &str = "weather-app/1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Forecast periods included in a forecast
const FORECAST_PERIODS: usize = 5;

/// Shared HTTP access to the NWS API
#[derive(Clone)]
pub struct NwsClient {
    http: reqwest::Client,
    base_url: String,
}

impl NwsClient {
    pub fn new() -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            base_url: NWS_API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// GET a GeoJSON document; any transport or status failure yields `None`
    async fn get(&self, url: &str) -> Option<Value> {
        debug!(url, "NWS request");
        let response = self
            .http
            .get(url)
            .header("Accept", "application/geo+json")
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;

        response.json().await.ok()
    }
}

/// Active weather alerts for a US state
pub struct GetAlerts {
    nws: NwsClient,
}

impl GetAlerts {
    pub fn new(nws: NwsClient) -> Self {
        Self { nws }
    }
}

#[async_trait]
impl Tool for GetAlerts {
    fn name(&self) -> &str {
        "get_alerts"
    }

    fn description(&self) -> &str {
        "Get weather alerts for a US state."
    }

    fn parameters_schema(&self) -> Value {
        tool_params!(state: "string" => "Two-letter US state code (e.g. CA, NY)")
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let state = params["state"]
            .as_str()
            .filter(|s| s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic()))
            .ok_or_else(|| ToolError::InvalidParams("state must be a two-letter code".into()))?
            .to_uppercase();

        let url = format!("{}/alerts/active/area/{}", self.nws.base_url, state);
        let data = self.nws.get(&url).await;

        let features = data
            .as_ref()
            .and_then(|d| d["features"].as_array())
            .ok_or_else(|| ToolError::ExecutionFailed("Unable to fetch alerts or no alerts found.".into()))?;

        Ok(Value::String(format_alerts(features)))
    }
}

/// Multi-day forecast for a latitude/longitude
pub struct GetForecast {
    nws: NwsClient,
}

impl GetForecast {
    pub fn new(nws: NwsClient) -> Self {
        Self { nws }
    }
}

#[async_trait]
impl Tool for GetForecast {
    fn name(&self) -> &str {
        "get_forecast"
    }

    fn description(&self) -> &str {
        "Get weather forecast for a location."
    }

    fn parameters_schema(&self) -> Value {
        tool_params!(
            latitude: "number" => "Latitude of the location",
            longitude: "number" => "Longitude of the location",
        )
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let latitude = coordinate(&params, "latitude", 90.0)?;
        let longitude = coordinate(&params, "longitude", 180.0)?;

        let points_url = format!("{}/points/{},{}", self.nws.base_url, latitude, longitude);
        let points = self.nws.get(&points_url).await.ok_or_else(|| {
            ToolError::ExecutionFailed("Unable to fetch forecast data for this location.".into())
        })?;

        let forecast_url = points["properties"]["forecast"].as_str().ok_or_else(|| {
            ToolError::ExecutionFailed("Unable to fetch forecast data for this location.".into())
        })?;

        let forecast = self
            .nws
            .get(forecast_url)
            .await
            .ok_or_else(|| ToolError::ExecutionFailed("Unable to fetch detailed forecast.".into()))?;

        let periods = forecast["properties"]["periods"]
            .as_array()
            .ok_or_else(|| ToolError::ExecutionFailed("Unable to fetch detailed forecast.".into()))?;

        Ok(Value::String(format_periods(periods)))
    }
}

fn coordinate(params: &Value, field: &str, bound: f64) -> Result<f64, ToolError> {
    params[field]
        .as_f64()
        .filter(|v| v.abs() <= bound)
        .ok_or_else(|| ToolError::InvalidParams(format!("{} must be a number within ±{}", field, bound)))
}

fn field<'a>(props: &'a Value, key: &str, fallback: &'a str) -> &'a str {
    props[key].as_str().unwrap_or(fallback)
}

fn format_alerts(features: &[Value]) -> String {
    if features.is_empty() {
        return "No active alerts for this state.".to_string();
    }

    features
        .iter()
        .map(|feature| {
            let props = &feature["properties"];
            format!(
                "Event: {}\nArea: {}\nSeverity: {}\nDescription: {}\nInstructions: {}",
                field(props, "event", "Unknown"),
                field(props, "areaDesc", "Unknown"),
                field(props, "severity", "Unknown"),
                field(props, "description", "No description available"),
                field(props, "instruction", "No specific instructions provided"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn format_periods(periods: &[Value]) -> String {
    periods
        .iter()
        .take(FORECAST_PERIODS)
        .map(|period| {
            format!(
                "{}:\nTemperature: {}°{}\nWind: {} {}\nForecast: {}",
                field(period, "name", "Unknown"),
                period["temperature"],
                field(period, "temperatureUnit", "F"),
                field(period, "windSpeed", "?"),
                field(period, "windDirection", ""),
                field(period, "detailedForecast", ""),
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}
