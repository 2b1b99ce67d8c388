// Model-call interface
//
// The core never talks to a model endpoint directly. Stages build a Prompt
// and a ResponseSchema and hand them to a ModelClient; transport, timeouts
// and authentication belong to the client. Retries live in the stages.

use crate::config::ModelConfig;
use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// JSON Schema describing the structured response a stage expects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

/// Settings handed to a client at construction. The output token ceiling is
/// explicit here rather than patched into the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self::from(&ModelConfig::default())
    }
}

impl From<&ModelConfig> for ModelSettings {
    fn from(config: &ModelConfig) -> Self {
        Self {
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Blocking structured-output model call.
///
/// Implementations must return `ModelError::Malformed` when the response is
/// not parseable structured data, and must not retry internally.
pub trait ModelClient: Send + Sync {
    fn complete(&self, prompt: &Prompt, schema: &ResponseSchema) -> Result<Value, ModelError>;

    /// Model identifier, part of the result cache key
    fn name(&self) -> &str;
}

/// Extract a JSON value from raw completion text.
///
/// Tries the whole text, then a ```json fence, then any fence, then the span
/// from the first `{`/`[` to the last `}`/`]`.
pub fn parse_structured_output(raw: &str) -> Result<Value, ModelError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ModelError::Malformed("empty response".to_string()));
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    for fence in ["```json", "```"] {
        if let Some(body) = fenced_block(text, fence) {
            if let Ok(value) = serde_json::from_str::<Value>(body.trim()) {
                return Ok(value);
            }
        }
    }

    let open = text.find(['{', '[']);
    let close = text.rfind(['}', ']']);
    if let (Some(open), Some(close)) = (open, close) {
        if close > open {
            if let Ok(value) = serde_json::from_str::<Value>(&text[open..=close]) {
                return Ok(value);
            }
        }
    }

    let preview: String = text.chars().take(120).collect();
    Err(ModelError::Malformed(format!(
        "no JSON value found in response: {preview}"
    )))
}

fn fenced_block<'a>(text: &'a str, fence: &str) -> Option<&'a str> {
    let start = text.find(fence)? + fence.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

/// Accept either a bare array or an object wrapping one under a known key
pub fn items_array(value: Value) -> Result<Vec<Value>, ModelError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in ["requirements", "items", "results", "data"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(items);
                }
            }
            Err(ModelError::Malformed(
                "expected a JSON array of items".to_string(),
            ))
        }
        other => Err(ModelError::Malformed(format!(
            "expected a JSON array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
