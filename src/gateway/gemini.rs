//! Gemini gateway with function calling
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{new_call_id, ModelGateway, ModelOutcome};
use crate::error::AgentError;
use crate::models::{Message, MessageContent, Role, ToolCallRequest};
use crate::tools::{ParamKind, ToolSchema};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const SYSTEM_PROMPT: &str = r#"You are a stock trading assistant.

Guidelines:
- Use the available tools to look up prices and market data instead of guessing
- To buy stocks, call buy_stocks with the symbol, the quantity and the total price (quantity times the current price)
- A purchase only happens after the user approves it; report the tool's answer faithfully
- Be concise and precise with numbers"#;

/// Reusable Gemini gateway (connection-pooled)
pub struct GeminiGateway {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiGateway {
    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request(history: &[Message], tools: &[ToolSchema]) -> GeminiRequest {
        let declarations: Vec<FunctionDeclaration> = tools.iter().map(declaration).collect();

        GeminiRequest {
            contents: build_contents(history),
            tools: if declarations.is_empty() {
                Vec::new()
            } else {
                vec![ToolDeclarations {
                    function_declarations: declarations,
                }]
            },
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(SYSTEM_PROMPT)],
            },
        }
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    async fn converse(&self, history: &[Message], tools: &[ToolSchema]) -> Result<ModelOutcome> {
        if self.api_key.is_empty() {
            return Err(AgentError::Gateway("GEMINI_API_KEY not configured".to_string()));
        }

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let request = Self::build_request(history, tools);

        info!(model = %self.model, messages = history.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AgentError::Gateway(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(AgentError::Gateway(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AgentError::Gateway(format!("Gemini parse error: {}", e))
        })?;

        if let Some(usage) = &gemini_response.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "Gemini usage"
            );
        }

        parse_response(gemini_response)
    }
}

fn gemini_type(kind: ParamKind) -> &'static str {
    match kind {
        ParamKind::String => "STRING",
        ParamKind::Integer => "INTEGER",
        ParamKind::Number => "NUMBER",
        ParamKind::Boolean => "BOOLEAN",
        ParamKind::Object => "OBJECT",
        ParamKind::Array => "ARRAY",
    }
}

fn declaration(schema: &ToolSchema) -> FunctionDeclaration {
    let parameters = if schema.parameters.is_empty() {
        None
    } else {
        let mut properties = Map::new();
        for param in &schema.parameters {
            properties.insert(
                param.name.clone(),
                json!({
                    "type": gemini_type(param.kind),
                    "description": param.description,
                }),
            );
        }
        let required: Vec<&str> = schema
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        Some(json!({
            "type": "OBJECT",
            "properties": properties,
            "required": required,
        }))
    };

    FunctionDeclaration {
        name: schema.name.clone(),
        description: schema.description.clone(),
        parameters,
    }
}

/// Map the history to Gemini contents.
///
/// Consecutive tool results are grouped into one `user` turn, which is how
/// Gemini expects the answers to a parallel function call.
fn build_contents(history: &[Message]) -> Vec<Content> {
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    let mut contents: Vec<Content> = Vec::with_capacity(history.len());

    for message in history {
        match message.role {
            Role::User => contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(message.content.to_string())],
            }),
            Role::Assistant => {
                let mut parts = Vec::new();
                if let Some(text) = message.content.as_text().filter(|t| !t.is_empty()) {
                    parts.push(Part::text(text));
                }
                for call in &message.tool_calls {
                    call_names.insert(call.call_id.as_str(), call.tool_name.as_str());
                    parts.push(Part {
                        function_call: Some(FunctionCall {
                            id: Some(call.call_id.clone()),
                            name: call.tool_name.clone(),
                            args: Value::Object(call.arguments.clone()),
                        }),
                        ..Part::default()
                    });
                }
                contents.push(Content {
                    role: Some("model".to_string()),
                    parts,
                });
            }
            Role::Tool => {
                let call_id = message.tool_call_id.clone();
                let name = call_id
                    .as_deref()
                    .and_then(|id| call_names.get(id).copied())
                    .unwrap_or("unknown_tool")
                    .to_string();
                let response = match &message.content {
                    MessageContent::Structured(Value::Object(map)) => Value::Object(map.clone()),
                    other => json!({ "result": other.to_value() }),
                };
                let part = Part {
                    function_response: Some(FunctionResponse {
                        id: call_id,
                        name,
                        response,
                    }),
                    ..Part::default()
                };

                match contents.last_mut() {
                    Some(last) if last.is_function_responses() => last.parts.push(part),
                    _ => contents.push(Content {
                        role: Some("user".to_string()),
                        parts: vec![part],
                    }),
                }
            }
        }
    }

    contents
}

fn parse_response(response: GeminiResponse) -> Result<ModelOutcome> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Gateway("No response from Gemini API".to_string()))?;

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    let calls: Vec<ToolCallRequest> = parts
        .iter()
        .filter_map(|p| p.function_call.as_ref())
        .map(|call| {
            ToolCallRequest::new(
                call.id.clone().unwrap_or_else(new_call_id),
                call.name.clone(),
                call.args.clone(),
            )
        })
        .collect();

    if !calls.is_empty() {
        return Ok(ModelOutcome::ToolCallBatch(calls));
    }

    let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
    if text.trim().is_empty() {
        return Err(AgentError::Gateway(format!(
            "Empty response from Gemini (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(ModelOutcome::FinalMessage(text))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn is_function_responses(&self) -> bool {
        self.role.as_deref() == Some("user")
            && !self.parts.is_empty()
            && self.parts.iter().all(|p| p.function_response.is_some())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::trading::{BuyStocksTool, GetStockPriceTool};

    fn tool_turn_history() -> Vec<Message> {
        vec![
            Message::user("Compare MSFT and AAPL"),
            Message::assistant_with_tool_calls(vec![
                ToolCallRequest::new("c1", "get_stock_price", json!({"symbol": "MSFT"})),
                ToolCallRequest::new("c2", "get_stock_price", json!({"symbol": "AAPL"})),
            ]),
            Message::tool_result("c1", json!(200.3)),
            Message::tool_result("c2", json!(100.4)),
        ]
    }

    #[test]
    fn test_request_serialization() {
        let request = GeminiGateway::build_request(
            &[Message::user("What is the price of MSFT?")],
            &[GetStockPriceTool::schema(), BuyStocksTool::schema()],
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "What is the price of MSFT?");
        assert!(json["systemInstruction"]["parts"][0]["text"].is_string());
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);

        let declarations = &json["tools"][0]["functionDeclarations"];
        assert_eq!(declarations[1]["name"], "buy_stocks");
        assert_eq!(
            declarations[1]["parameters"]["properties"]["quantity"]["type"],
            "INTEGER"
        );
        assert_eq!(
            declarations[1]["parameters"]["required"],
            json!(["symbol", "quantity", "total_price"])
        );
    }

    #[test]
    fn test_parallel_results_grouped() {
        let contents = build_contents(&tool_turn_history());
        assert_eq!(contents.len(), 3);

        assert_eq!(contents[1].role.as_deref(), Some("model"));
        assert_eq!(contents[1].parts.len(), 2);

        let responses = &contents[2];
        assert_eq!(responses.role.as_deref(), Some("user"));
        assert_eq!(responses.parts.len(), 2);
        let first = responses.parts[0].function_response.as_ref().unwrap();
        assert_eq!(first.name, "get_stock_price");
        assert_eq!(first.response, json!({"result": 200.3}));
    }

    #[test]
    fn test_parse_function_calls_in_order() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"functionCall": {"name": "get_stock_price", "args": {"symbol": "MSFT"}}},
                        {"functionCall": {"id": "abc", "name": "buy_stocks", "args": {"symbol": "MSFT", "quantity": 10, "total_price": 2003.0}}}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 8}
        }))
        .unwrap();

        let ModelOutcome::ToolCallBatch(calls) = parse_response(response).unwrap() else {
            panic!("expected a tool call batch");
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool_name, "get_stock_price");
        assert!(calls[0].call_id.starts_with("call_"));
        assert_eq!(calls[1].call_id, "abc");
        assert_eq!(calls[1].arguments["quantity"], json!(10));
    }

    #[test]
    fn test_parse_text_and_empty() {
        let text: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "MSFT trades at "}, {"text": "200.3."}]}}]
        }))
        .unwrap();
        assert_eq!(
            parse_response(text).unwrap(),
            ModelOutcome::FinalMessage("MSFT trades at 200.3.".into())
        );

        let empty: GeminiResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(matches!(parse_response(empty), Err(AgentError::Gateway(_))));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_gateway_error() {
        let gateway = GeminiGateway::new(String::new(), "gemini-2.0-flash").unwrap();
        let result = gateway.converse(&[Message::user("hi")], &[]).await;
        assert!(matches!(result, Err(AgentError::Gateway(_))));
    }
}
