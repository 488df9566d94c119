//! Tool trait and registry
//!
//! Every tool is registered with a declared argument schema. The registry
//! validates a model's tool call against that schema before dispatching.
//! A tool may pause the whole run by returning a suspend signal; the run
//! later re-enters it through [`Tool::resume`] with the human decision.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::models::ToolArguments;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub mod market;
pub mod trading;

pub use market::AlphaVantageClient;
pub use trading::{BuyStocksTool, GetStockPriceTool, TradeLedger, TradeRecord};

//
// ================= Schema =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

/// Declared shape of a tool: name, description and parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn required(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.parameters.push(ParamSpec {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.parameters.push(ParamSpec {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: false,
        });
        self
    }

    /// Check arguments against the declared parameters.
    ///
    /// Undeclared extra arguments are ignored.
    pub fn validate(&self, arguments: &ToolArguments) -> Result<()> {
        for param in &self.parameters {
            match arguments.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(AgentError::InvalidArguments {
                        tool: self.name.clone(),
                        reason: format!("missing required parameter '{}'", param.name),
                    });
                }
                Some(value) if !value.is_null() && !param.kind.matches(value) => {
                    return Err(AgentError::InvalidArguments {
                        tool: self.name.clone(),
                        reason: format!(
                            "parameter '{}' must be of kind {}, got {}",
                            param.name,
                            param.kind.as_str(),
                            value
                        ),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Object JSON schema for model backends.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                json!({
                    "type": param.kind.as_str(),
                    "description": param.description,
                }),
            );
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

//
// ================= Tool =================
//

/// Request from a tool to pause the run for a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendSignal {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Complete(Value),
    Suspend(SuspendSignal),
}

impl ToolOutcome {
    pub fn suspend(prompt: impl Into<String>) -> Self {
        ToolOutcome::Suspend(SuspendSignal {
            prompt: prompt.into(),
        })
    }
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    async fn execute(&self, arguments: &ToolArguments) -> Result<ToolOutcome>;

    /// Continue a call that suspended, with the human decision as the value
    /// of the suspension point.
    async fn resume(&self, _arguments: &ToolArguments, _decision: &str) -> Result<Value> {
        Err(AgentError::ToolError(
            "tool does not accept resume decisions".to_string(),
        ))
    }
}

struct RegisteredTool {
    schema: ToolSchema,
    implementation: Arc<dyn Tool>,
}

/// Tool registry for validating and dispatching tool calls
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, schema: ToolSchema, implementation: Arc<dyn Tool>) -> Result<()> {
        if self.tools.contains_key(&schema.name) {
            return Err(AgentError::DuplicateTool(schema.name));
        }

        let name = schema.name.clone();
        self.order.push(name.clone());
        self.tools.insert(
            name,
            RegisteredTool {
                schema,
                implementation,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.schema.clone())
            .collect()
    }

    fn lookup(&self, name: &str, arguments: &ToolArguments) -> Result<&RegisteredTool> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        tool.schema.validate(arguments)?;
        Ok(tool)
    }

    pub async fn dispatch(
        &self,
        call_id: &str,
        name: &str,
        arguments: &ToolArguments,
    ) -> Result<ToolOutcome> {
        let tool = self.lookup(name, arguments)?;
        debug!(call_id, tool_name = name, "Dispatching tool call");
        tool.implementation.execute(arguments).await
    }

    pub async fn resume(
        &self,
        call_id: &str,
        name: &str,
        arguments: &ToolArguments,
        decision: &str,
    ) -> Result<Value> {
        let tool = self.lookup(name, arguments)?;
        debug!(call_id, tool_name = name, "Resuming suspended tool call");
        tool.implementation.resume(arguments, decision).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the trading tools and the market data tools.
pub fn create_default_registry(config: &AgentConfig, ledger: TradeLedger) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    registry.register(GetStockPriceTool::schema(), Arc::new(GetStockPriceTool))?;
    registry.register(BuyStocksTool::schema(), Arc::new(BuyStocksTool::new(ledger)))?;

    let client = AlphaVantageClient::from_config(config)?;
    market::register_market_tools(&mut registry, client)?;

    Ok(registry)
}
