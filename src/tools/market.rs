//! Market data tools backed by the Alpha Vantage query API.
//!
//! HTTP access lives in [`AlphaVantageClient`]; each tool's response
//! formatting is a pure function over the decoded JSON so it can be tested
//! without the network.

use super::{ParamKind, Tool, ToolOutcome, ToolRegistry, ToolSchema};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::models::ToolArguments;
use crate::Result;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct AlphaVantageClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AlphaVantageClient {
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config.alpha_vantage_base_url.clone(),
            api_key: config.alpha_vantage_api_key.clone(),
        })
    }

    /// GET the query endpoint and return the decoded payload.
    ///
    /// Rate-limit notes and API error messages come back with a 200 status,
    /// so they are mapped to errors here.
    async fn query(&self, params: &[(&str, String)]) -> Result<Value> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::ToolError("Missing ALPHA_VANTAGE_API_KEY in environment".to_string()))?;

        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("apikey", api_key.to_string()));

        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| AgentError::ToolError(format!("Alpha Vantage request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::ToolError(format!(
                "Alpha Vantage returned {}",
                status
            )));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| AgentError::ToolError(format!("Invalid JSON response: {}", e)))?;

        api_error(&body).map_or(Ok(body), |message| Err(AgentError::ToolError(message)))
    }
}

fn api_error(body: &Value) -> Option<String> {
    ["Note", "Error Message", "Information"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

//
// ================= Tool kinds =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketTool {
    RealtimeStock,
    SearchTicker,
    CompanyOverview,
    EarningsData,
    HistoricalStockData,
}

impl MarketTool {
    pub const ALL: [MarketTool; 5] = [
        MarketTool::RealtimeStock,
        MarketTool::SearchTicker,
        MarketTool::CompanyOverview,
        MarketTool::EarningsData,
        MarketTool::HistoricalStockData,
    ];

    pub fn schema(&self) -> ToolSchema {
        match self {
            MarketTool::RealtimeStock => ToolSchema::new(
                "get_realtime_stock",
                "Fetch the latest available intraday stock price for a symbol",
            )
            .required("symbol", ParamKind::String, "Stock ticker symbol"),
            MarketTool::SearchTicker => ToolSchema::new(
                "search_ticker",
                "Search ticker symbols matching a company name",
            )
            .required("company_name", ParamKind::String, "Partial or full company name"),
            MarketTool::CompanyOverview => ToolSchema::new(
                "get_company_overview",
                "Retrieve a company's overview and key financial metrics",
            )
            .required("symbol", ParamKind::String, "Stock ticker symbol"),
            MarketTool::EarningsData => ToolSchema::new(
                "get_earnings_data",
                "Fetch the most recent quarterly earnings report",
            )
            .required("symbol", ParamKind::String, "Stock ticker symbol"),
            MarketTool::HistoricalStockData => ToolSchema::new(
                "get_historical_stock_data",
                "Summarize historical price data for a symbol",
            )
            .required("symbol", ParamKind::String, "Stock ticker symbol")
            .optional(
                "interval",
                ParamKind::String,
                "daily (default), weekly or monthly",
            ),
        }
    }
}

pub struct MarketDataTool {
    kind: MarketTool,
    client: AlphaVantageClient,
}

impl MarketDataTool {
    pub fn new(kind: MarketTool, client: AlphaVantageClient) -> Self {
        Self { kind, client }
    }
}

fn str_arg<'a>(arguments: &'a ToolArguments, name: &str) -> Result<&'a str> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::ToolError(format!("'{}' must be a string", name)))
}

#[async_trait::async_trait]
impl Tool for MarketDataTool {
    async fn execute(&self, arguments: &ToolArguments) -> Result<ToolOutcome> {
        let text = match self.kind {
            MarketTool::RealtimeStock => {
                let symbol = str_arg(arguments, "symbol")?;
                let data = self
                    .client
                    .query(&[
                        ("function", "TIME_SERIES_INTRADAY".to_string()),
                        ("symbol", symbol.to_uppercase()),
                        ("interval", "5min".to_string()),
                    ])
                    .await
                    .map_err(|e| context(e, &format!("real-time data for {}", symbol)))?;
                format_realtime(symbol, &data)
            }
            MarketTool::SearchTicker => {
                let company = str_arg(arguments, "company_name")?;
                let data = self
                    .client
                    .query(&[
                        ("function", "SYMBOL_SEARCH".to_string()),
                        ("keywords", company.to_string()),
                    ])
                    .await
                    .map_err(|e| context(e, &format!("search results for '{}'", company)))?;
                format_search(company, &data)
            }
            MarketTool::CompanyOverview => {
                let symbol = str_arg(arguments, "symbol")?;
                let data = self
                    .client
                    .query(&[
                        ("function", "OVERVIEW".to_string()),
                        ("symbol", symbol.to_uppercase()),
                    ])
                    .await
                    .map_err(|e| context(e, &format!("overview for {}", symbol)))?;
                format_overview(symbol, &data)
            }
            MarketTool::EarningsData => {
                let symbol = str_arg(arguments, "symbol")?;
                let data = self
                    .client
                    .query(&[
                        ("function", "EARNINGS".to_string()),
                        ("symbol", symbol.to_uppercase()),
                    ])
                    .await
                    .map_err(|e| context(e, &format!("earnings for {}", symbol)))?;
                format_earnings(symbol, &data)
            }
            MarketTool::HistoricalStockData => {
                let symbol = str_arg(arguments, "symbol")?;
                let interval = arguments
                    .get("interval")
                    .and_then(Value::as_str)
                    .unwrap_or("daily");
                let data = self
                    .client
                    .query(&[
                        ("function", series_function(interval).to_string()),
                        ("symbol", symbol.to_uppercase()),
                    ])
                    .await
                    .map_err(|e| context(e, &format!("{} data for {}", interval, symbol)))?;
                format_historical(symbol, interval, &data)
            }
        };

        Ok(ToolOutcome::Complete(json!(text)))
    }
}

fn context(error: AgentError, what: &str) -> AgentError {
    warn!(error = %error, "Market data request failed");
    match error {
        AgentError::ToolError(message) => {
            AgentError::ToolError(format!("Error fetching {}: {}", what, message))
        }
        other => other,
    }
}

pub fn register_market_tools(registry: &mut ToolRegistry, client: AlphaVantageClient) -> Result<()> {
    for kind in MarketTool::ALL {
        registry.register(
            kind.schema(),
            Arc::new(MarketDataTool::new(kind, client.clone())),
        )?;
    }
    Ok(())
}

//
// ================= Formatting =================
//

fn series_function(interval: &str) -> &'static str {
    match interval.to_lowercase().as_str() {
        "weekly" => "TIME_SERIES_WEEKLY",
        "monthly" => "TIME_SERIES_MONTHLY",
        _ => "TIME_SERIES_DAILY",
    }
}

fn field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("N/A")
}

fn parse_f64(data: &Value, key: &str) -> Option<f64> {
    data.get(key)?.as_str()?.parse().ok()
}

fn title_case(word: &str) -> String {
    let lowered = word.to_lowercase();
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Latest-key lookup; Alpha Vantage timestamps sort lexicographically.
fn latest_entry(series: &Map<String, Value>) -> Option<(&String, &Value)> {
    series.iter().max_by(|a, b| a.0.cmp(b.0))
}

pub fn format_realtime(symbol: &str, data: &Value) -> String {
    let latest = data
        .get("Time Series (5min)")
        .and_then(Value::as_object)
        .and_then(latest_entry)
        .and_then(|(_, bar)| parse_f64(bar, "1. open"));

    match latest {
        Some(price) => format!(
            "The latest price for {} is ${:.2}.",
            symbol.to_uppercase(),
            price
        ),
        None => format!("Error: Could not fetch real-time data for {}.", symbol),
    }
}

pub fn format_search(company_name: &str, data: &Value) -> String {
    let matches = data
        .get("bestMatches")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if matches.is_empty() {
        return format!("No ticker symbols found for {}.", company_name);
    }

    let lines: Vec<String> = matches
        .iter()
        .map(|m| {
            format!(
                "{} – {} ({})",
                field(m, "1. symbol"),
                field(m, "2. name"),
                field(m, "4. region")
            )
        })
        .collect();

    format!(
        "Search results for '{}':\n{}",
        company_name,
        lines.join("\n")
    )
}

pub fn format_overview(symbol: &str, data: &Value) -> String {
    if data.get("Name").is_none() {
        return format!("No company overview found for {}.", symbol);
    }

    format!(
        "Company Overview for {}:\nName: {}\nSector: {}\nIndustry: {}\nMarket Cap: {}\nRevenue (TTM): {}\nEPS: {}\nP/E Ratio: {}",
        symbol.to_uppercase(),
        field(data, "Name"),
        field(data, "Sector"),
        field(data, "Industry"),
        field(data, "MarketCapitalization"),
        field(data, "RevenueTTM"),
        field(data, "EPS"),
        field(data, "PERatio"),
    )
}

pub fn format_earnings(symbol: &str, data: &Value) -> String {
    let latest = data
        .get("quarterlyEarnings")
        .and_then(Value::as_array)
        .and_then(|q| q.first());

    let Some(latest) = latest else {
        return format!("No recent earnings data available for {}.", symbol);
    };

    format!(
        "Earnings Data for {}:\n- Fiscal Date Ending: {}\n- Reported EPS: {}\n- Estimated EPS: {}",
        symbol.to_uppercase(),
        field(latest, "fiscalDateEnding"),
        field(latest, "reportedEPS"),
        field(latest, "estimatedEPS"),
    )
}

pub fn format_historical(symbol: &str, interval: &str, data: &Value) -> String {
    let series = data
        .as_object()
        .and_then(|obj| obj.iter().find(|(k, _)| k.contains("Time Series")))
        .and_then(|(_, v)| v.as_object())
        .filter(|ts| !ts.is_empty());

    let Some(series) = series else {
        return format!(
            "Failed to fetch {} data for {}.",
            title_case(interval),
            symbol.to_uppercase()
        );
    };

    let Some((latest_date, latest)) = latest_entry(series) else {
        return format!(
            "Failed to fetch {} data for {}.",
            title_case(interval),
            symbol.to_uppercase()
        );
    };

    let highest = series
        .values()
        .filter_map(|bar| parse_f64(bar, "2. high"))
        .fold(f64::MIN, f64::max);
    let lowest = series
        .values()
        .filter_map(|bar| parse_f64(bar, "3. low"))
        .fold(f64::MAX, f64::min);
    let volume: u64 = series
        .values()
        .filter_map(|bar| bar.get("5. volume")?.as_str()?.parse::<u64>().ok())
        .sum();

    format!(
        "Summary of {} ({}):\n- Latest Date: {}\n- Open Price: ${:.2}\n- Close Price: ${:.2}\n- Highest Price: ${:.2}\n- Lowest Price: ${:.2}\n- Total Volume: {} shares",
        symbol.to_uppercase(),
        title_case(interval),
        latest_date,
        parse_f64(latest, "1. open").unwrap_or(0.0),
        parse_f64(latest, "4. close").unwrap_or(0.0),
        highest,
        lowest,
        group_thousands(volume),
    )
}
