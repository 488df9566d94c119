//! Offline keyword gateway
//!
//! Deterministic intent routing used when no model API key is configured.
//! It understands price questions and buy orders, which is enough to drive
//! the full tool loop including the approval flow.

use super::{new_call_id, ModelGateway, ModelOutcome};
use crate::models::{Message, MessageContent, Role, ToolCallRequest};
use crate::tools::ToolSchema;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

const HELP_TEXT: &str =
    "I can look up stock prices (\"What is the price of MSFT?\") or buy stocks (\"Buy 10 MSFT at 200.3\").";

#[derive(Debug, Clone, PartialEq)]
enum Intent {
    Price {
        symbol: String,
        quantity: Option<u64>,
    },
    Buy {
        symbol: String,
        quantity: u64,
        price: Option<f64>,
    },
    Unknown,
}

#[derive(Debug, Default)]
pub struct KeywordGateway;

impl KeywordGateway {
    pub fn new() -> Self {
        Self
    }
}

fn clean_token(token: &str) -> &str {
    token.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '$'))
}

/// Shouted words that are not tickers.
const NOT_TICKERS: &[&str] = &[
    "BUY", "PRICE", "QUOTE", "COST", "WORTH", "STOCK", "STOCKS", "SHARE", "SHARES", "WHAT",
    "IS", "THE", "OF", "AT", "FOR", "ME", "NOW", "PLEASE", "USD", "OK", "HI", "HEY", "AND",
];

fn is_symbol(token: &str) -> bool {
    (2..=5).contains(&token.len())
        && token.chars().all(|c| c.is_ascii_uppercase())
        && !NOT_TICKERS.contains(&token)
}

fn parse_price(token: &str) -> Option<f64> {
    token
        .trim_start_matches('$')
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|p| *p > 0.0)
}

fn parse_intent(text: &str) -> Intent {
    let lowered = text.to_lowercase();
    let has_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    let tokens: Vec<&str> = text.split_whitespace().map(clean_token).collect();
    let at_index = tokens.iter().position(|t| t.eq_ignore_ascii_case("at"));
    let before_at = &tokens[..at_index.unwrap_or(tokens.len())];

    let symbol = tokens
        .iter()
        .map(|t| t.trim_end_matches('.'))
        .find(|t| is_symbol(t));
    let Some(symbol) = symbol.map(str::to_string) else {
        return Intent::Unknown;
    };
    let quantity = before_at.iter().find_map(|t| t.parse::<u64>().ok());

    if has_any(&["buy", "purchase"]) {
        let price = at_index
            .and_then(|idx| tokens.get(idx + 1))
            .and_then(|t| parse_price(t));
        return Intent::Buy {
            symbol,
            quantity: quantity.unwrap_or(1),
            price,
        };
    }

    if has_any(&["price", "quote", "worth", "cost", "trading"]) {
        return Intent::Price { symbol, quantity };
    }

    Intent::Unknown
}

fn order_total(quantity: u64, price: f64) -> f64 {
    (quantity as f64 * price * 100.0).round() / 100.0
}

fn price_call(symbol: &str) -> ModelOutcome {
    ModelOutcome::ToolCallBatch(vec![ToolCallRequest::new(
        new_call_id(),
        "get_stock_price",
        json!({ "symbol": symbol }),
    )])
}

fn buy_call(symbol: &str, quantity: u64, price: f64) -> ModelOutcome {
    ModelOutcome::ToolCallBatch(vec![ToolCallRequest::new(
        new_call_id(),
        "buy_stocks",
        json!({
            "symbol": symbol,
            "quantity": quantity,
            "total_price": order_total(quantity, price),
        }),
    )])
}

fn tool_error(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Structured(Value::Object(map)) => {
            map.get("error").map(|e| e.as_str().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

#[async_trait]
impl ModelGateway for KeywordGateway {
    async fn converse(&self, history: &[Message], _tools: &[ToolSchema]) -> Result<ModelOutcome> {
        let Some(user_index) = history.iter().rposition(|m| m.role == Role::User) else {
            return Ok(ModelOutcome::FinalMessage(HELP_TEXT.to_string()));
        };
        let intent = parse_intent(&history[user_index].content.to_string());
        let turn = &history[user_index + 1..];

        let Some(last) = turn.last() else {
            // Fresh user message: decide which tool to call.
            return Ok(match intent {
                Intent::Price { symbol, .. } => price_call(&symbol),
                Intent::Buy {
                    symbol,
                    quantity,
                    price: Some(price),
                } => buy_call(&symbol, quantity, price),
                Intent::Buy { symbol, .. } => price_call(&symbol),
                Intent::Unknown => ModelOutcome::FinalMessage(HELP_TEXT.to_string()),
            });
        };

        if last.role != Role::Tool {
            return Ok(ModelOutcome::FinalMessage(HELP_TEXT.to_string()));
        }

        if let Some(error) = tool_error(&last.content) {
            return Ok(ModelOutcome::FinalMessage(format!(
                "Sorry, that did not work: {}",
                error
            )));
        }

        let outcome = match intent {
            Intent::Price { symbol, quantity } => {
                let mut answer = format!("The current price of {} is {}.", symbol, last.content);
                if let (Some(qty), Some(price)) = (quantity, last.content.to_value().as_f64()) {
                    answer.push_str(&format!(
                        " {} shares would cost ${:.2}.",
                        qty,
                        order_total(qty, price)
                    ));
                }
                ModelOutcome::FinalMessage(answer)
            }
            Intent::Buy {
                symbol, quantity, ..
            } => {
                let ordered = turn
                    .iter()
                    .any(|m| m.tool_calls.iter().any(|c| c.tool_name == "buy_stocks"));

                if ordered {
                    ModelOutcome::FinalMessage(last.content.to_string())
                } else {
                    match last.content.to_value().as_f64().filter(|p| *p > 0.0) {
                        Some(price) => buy_call(&symbol, quantity, price),
                        None => ModelOutcome::FinalMessage(format!(
                            "I could not find a price for {}.",
                            symbol
                        )),
                    }
                }
            }
            Intent::Unknown => ModelOutcome::FinalMessage(last.content.to_string()),
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intent() {
        assert_eq!(
            parse_intent("What is the current price of 10 MSFT stocks?"),
            Intent::Price {
                symbol: "MSFT".into(),
                quantity: Some(10)
            }
        );
        assert_eq!(
            parse_intent("buy 10 MSFT at $200.3."),
            Intent::Buy {
                symbol: "MSFT".into(),
                quantity: 10,
                price: Some(200.3)
            }
        );
        assert_eq!(
            parse_intent("Buy 10 MSFT stocks at current price."),
            Intent::Buy {
                symbol: "MSFT".into(),
                quantity: 10,
                price: None
            }
        );
        assert_eq!(
            parse_intent("Quote me AAPL."),
            Intent::Price {
                symbol: "AAPL".into(),
                quantity: None
            }
        );
        assert_eq!(
            parse_intent("What is the PRICE of MSFT"),
            Intent::Price {
                symbol: "MSFT".into(),
                quantity: None
            }
        );
        assert_eq!(
            parse_intent("BUY 5 AAPL NOW"),
            Intent::Buy {
                symbol: "AAPL".into(),
                quantity: 5,
                price: None
            }
        );
        assert_eq!(parse_intent("hello there"), Intent::Unknown);
    }

    #[tokio::test]
    async fn test_buy_without_price_looks_it_up_first() {
        let gateway = KeywordGateway::new();
        let mut history = vec![Message::user("Buy 10 MSFT stocks at current price.")];

        let ModelOutcome::ToolCallBatch(calls) = gateway.converse(&history, &[]).await.unwrap() else {
            panic!("expected a price lookup");
        };
        assert_eq!(calls[0].tool_name, "get_stock_price");

        history.push(Message::assistant_with_tool_calls(calls.clone()));
        history.push(Message::tool_result(calls[0].call_id.clone(), json!(200.3)));

        let ModelOutcome::ToolCallBatch(order) = gateway.converse(&history, &[]).await.unwrap() else {
            panic!("expected a buy order");
        };
        assert_eq!(order[0].tool_name, "buy_stocks");
        assert_eq!(order[0].arguments["total_price"], json!(2003.0));
        assert_eq!(order[0].arguments["quantity"], json!(10));
    }

    #[tokio::test]
    async fn test_price_answer_mentions_quote() {
        let gateway = KeywordGateway::new();
        let call = ToolCallRequest::new("c1", "get_stock_price", json!({"symbol": "MSFT"}));
        let history = vec![
            Message::user("What is the price of MSFT?"),
            Message::assistant_with_tool_calls(vec![call]),
            Message::tool_result("c1", json!(200.3)),
        ];

        let outcome = gateway.converse(&history, &[]).await.unwrap();
        assert_eq!(
            outcome,
            ModelOutcome::FinalMessage("The current price of MSFT is 200.3.".into())
        );
    }

    #[tokio::test]
    async fn test_tool_error_is_reported() {
        let gateway = KeywordGateway::new();
        let history = vec![
            Message::user("What is the price of MSFT?"),
            Message::assistant_with_tool_calls(vec![ToolCallRequest::new(
                "c1",
                "get_stock_price",
                json!({}),
            )]),
            Message::tool_result("c1", json!({"error": "missing required parameter 'symbol'"})),
        ];

        let ModelOutcome::FinalMessage(text) = gateway.converse(&history, &[]).await.unwrap() else {
            panic!("expected final message");
        };
        assert!(text.contains("missing required parameter"));
    }
}
