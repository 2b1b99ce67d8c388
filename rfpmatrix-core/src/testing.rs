//! Scripted model client for tests and offline runs.
//!
//! Responses are routed by response-schema name (`extract`, `classify`,
//! `ground`). Queued responses are served first, then the registered handler.

use crate::error::ModelError;
use crate::model::{ModelClient, Prompt, ResponseSchema};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

type Handler = Box<dyn Fn(&Prompt) -> Result<Value, ModelError> + Send + Sync>;

pub struct ScriptedModel {
    name: String,
    handlers: HashMap<String, Handler>,
    queued: Mutex<HashMap<String, VecDeque<Result<Value, ModelError>>>>,
    calls: Mutex<Vec<(String, Prompt)>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::named("scripted")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
            queued: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call for `schema` with `handler`
    pub fn on<F>(mut self, schema: &str, handler: F) -> Self
    where
        F: Fn(&Prompt) -> Result<Value, ModelError> + Send + Sync + 'static,
    {
        self.handlers.insert(schema.to_string(), Box::new(handler));
        self
    }

    /// Serve these responses, in order, before falling back to the handler
    pub fn with_sequence(self, schema: &str, responses: Vec<Result<Value, ModelError>>) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued
                .entry(schema.to_string())
                .or_default()
                .extend(responses);
        }
        self
    }

    pub fn calls(&self, schema: &str) -> usize {
        self.prompts(schema).len()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    pub fn prompts(&self, schema: &str) -> Vec<Prompt> {
        match self.calls.lock() {
            Ok(calls) => calls
                .iter()
                .filter(|(name, _)| name == schema)
                .map(|(_, prompt)| prompt.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Batch items embedded after the `ITEMS:` marker of a Classify or Ground prompt
    pub fn batch_items(prompt: &Prompt) -> Vec<Value> {
        prompt
            .user
            .rsplit_once("ITEMS:\n")
            .and_then(|(_, items)| serde_json::from_str::<Value>(items.trim()).ok())
            .and_then(|value| match value {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, prompt: &Prompt, schema: &ResponseSchema) -> Result<Value, ModelError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((schema.name.clone(), prompt.clone()));
        }

        let queued = self
            .queued
            .lock()
            .ok()
            .and_then(|mut queued| queued.get_mut(&schema.name).and_then(VecDeque::pop_front));
        if let Some(response) = queued {
            return response;
        }

        match self.handlers.get(&schema.name) {
            Some(handler) => handler(prompt),
            None => Err(ModelError::Transport(format!(
                "no scripted response for schema '{}'",
                schema.name
            ))),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts;
    use serde_json::json;

    #[test]
    fn test_routes_by_schema_and_records_calls() {
        let model = ScriptedModel::new()
            .on("extract", |_| Ok(json!([])))
            .with_sequence("extract", vec![Err(ModelError::Timeout("slow".into()))]);

        let prompt = prompts::extract_prompt("S", "text");
        let schema = prompts::extract_schema();
        assert!(model.complete(&prompt, &schema).is_err());
        assert_eq!(model.complete(&prompt, &schema).unwrap(), json!([]));
        assert_eq!(model.calls("extract"), 2);
        assert!(model.complete(&prompt, &prompts::ground_schema()).is_err());
        assert_eq!(model.total_calls(), 3);
    }

    #[test]
    fn test_batch_items_from_prompt() {
        let items = json!([{"_idx": 0, "quote": "q"}]);
        let prompt = prompts::ground_prompt("[Page 1]\nq", &items);
        assert_eq!(ScriptedModel::batch_items(&prompt), vec![json!({"_idx": 0, "quote": "q"})]);
    }
}
