//! Trading tools: quote lookup and human-approved stock purchases.

use super::{ParamKind, Tool, ToolOutcome, ToolSchema};
use crate::error::AgentError;
use crate::models::ToolArguments;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// The only decision that approves a purchase. Anything else declines.
pub const APPROVAL_DECISION: &str = "yes";

/// Mocked quote table.
fn quote(symbol: &str) -> f64 {
    match symbol {
        "MSFT" => 200.3,
        "AAPL" => 100.4,
        "AMZN" => 150.0,
        "RIL" => 87.6,
        _ => 0.0,
    }
}

/// Render a price the way it is quoted back to users: always with a
/// fractional part (`2003.0`, `2003.25`).
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn str_arg<'a>(arguments: &'a ToolArguments, name: &str) -> Result<&'a str> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::ToolError(format!("'{}' must be a string", name)))
}

fn f64_arg(arguments: &ToolArguments, name: &str) -> Result<f64> {
    arguments
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| AgentError::ToolError(format!("'{}' must be a number", name)))
}

fn i64_arg(arguments: &ToolArguments, name: &str) -> Result<i64> {
    arguments
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| AgentError::ToolError(format!("'{}' must be an integer", name)))
}

//
// ================= Ledger =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub symbol: String,
    pub quantity: i64,
    pub total_price: f64,
    pub executed_at: DateTime<Utc>,
}

/// Purchases approved by a human, shared between tool instances.
#[derive(Clone, Default)]
pub struct TradeLedger {
    trades: Arc<RwLock<Vec<TradeRecord>>>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, trade: TradeRecord) {
        self.trades.write().await.push(trade);
    }

    pub async fn trades(&self) -> Vec<TradeRecord> {
        self.trades.read().await.clone()
    }
}

//
// ================= Tools =================
//

pub struct GetStockPriceTool;

impl GetStockPriceTool {
    pub fn schema() -> ToolSchema {
        ToolSchema::new(
            "get_stock_price",
            "Return the current price of a stock given the stock symbol",
        )
        .required("symbol", ParamKind::String, "Stock ticker symbol, e.g. MSFT")
    }
}

#[async_trait::async_trait]
impl Tool for GetStockPriceTool {
    async fn execute(&self, arguments: &ToolArguments) -> Result<ToolOutcome> {
        let symbol = str_arg(arguments, "symbol")?;
        Ok(ToolOutcome::Complete(json!(quote(symbol))))
    }
}

/// Buys stocks, but only after a human approves the order.
pub struct BuyStocksTool {
    ledger: TradeLedger,
}

impl BuyStocksTool {
    pub fn new(ledger: TradeLedger) -> Self {
        Self { ledger }
    }

    pub fn schema() -> ToolSchema {
        ToolSchema::new(
            "buy_stocks",
            "Buy stocks given the stock symbol and quantity",
        )
        .required("symbol", ParamKind::String, "Stock ticker symbol")
        .required("quantity", ParamKind::Integer, "Number of shares to buy")
        .required("total_price", ParamKind::Number, "Total price of the order in USD")
    }
}

#[async_trait::async_trait]
impl Tool for BuyStocksTool {
    async fn execute(&self, arguments: &ToolArguments) -> Result<ToolOutcome> {
        let symbol = str_arg(arguments, "symbol")?;
        let quantity = i64_arg(arguments, "quantity")?;
        let total_price = f64_arg(arguments, "total_price")?;

        Ok(ToolOutcome::suspend(format!(
            "Approve buying {} {} stocks for ${:.2}?",
            quantity, symbol, total_price
        )))
    }

    async fn resume(&self, arguments: &ToolArguments, decision: &str) -> Result<Value> {
        let symbol = str_arg(arguments, "symbol")?;
        let quantity = i64_arg(arguments, "quantity")?;
        let total_price = f64_arg(arguments, "total_price")?;

        if decision != APPROVAL_DECISION {
            info!(symbol, quantity, "Purchase declined");
            return Ok(json!("Buying declined."));
        }

        self.ledger
            .record(TradeRecord {
                symbol: symbol.to_string(),
                quantity,
                total_price,
                executed_at: Utc::now(),
            })
            .await;

        info!(symbol, quantity, total_price, "Purchase approved and recorded");

        Ok(json!(format!(
            "You bought {} shares of {} for a total price of {}",
            quantity,
            symbol,
            format_amount(total_price)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> ToolArguments {
        json!({"symbol": "MSFT", "quantity": 10, "total_price": 2003.0})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_quotes() {
        let tool = GetStockPriceTool;
        let args = json!({"symbol": "MSFT"}).as_object().cloned().unwrap();
        assert_eq!(
            tool.execute(&args).await.unwrap(),
            ToolOutcome::Complete(json!(200.3))
        );

        let unknown = json!({"symbol": "ZZZZ"}).as_object().cloned().unwrap();
        assert_eq!(
            tool.execute(&unknown).await.unwrap(),
            ToolOutcome::Complete(json!(0.0))
        );
    }

    #[tokio::test]
    async fn test_buy_suspends_with_prompt() {
        let tool = BuyStocksTool::new(TradeLedger::new());
        let outcome = tool.execute(&order()).await.unwrap();
        assert_eq!(
            outcome,
            ToolOutcome::suspend("Approve buying 10 MSFT stocks for $2003.00?")
        );
    }

    #[tokio::test]
    async fn test_resume_yes_records_trade() {
        let ledger = TradeLedger::new();
        let tool = BuyStocksTool::new(ledger.clone());

        let result = tool.resume(&order(), "yes").await.unwrap();
        assert_eq!(
            result,
            json!("You bought 10 shares of MSFT for a total price of 2003.0")
        );

        let trades = ledger.trades().await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, 10);
    }

    #[tokio::test]
    async fn test_anything_but_yes_declines() {
        let ledger = TradeLedger::new();
        let tool = BuyStocksTool::new(ledger.clone());

        for decision in ["no", "Yes", "yes ", "maybe", ""] {
            let result = tool.resume(&order(), decision).await.unwrap();
            assert_eq!(result, json!("Buying declined."));
        }
        assert!(ledger.trades().await.is_empty());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(2003.0), "2003.0");
        assert_eq!(format_amount(2003.25), "2003.25");
    }
}
