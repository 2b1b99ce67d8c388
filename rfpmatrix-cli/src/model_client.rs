// Chat-completions model client
//
// Blocking client for OpenAI-compatible and Azure OpenAI endpoints. One
// request per `complete` call; retries belong to the pipeline stages.

use rfpmatrix_core::model::parse_structured_output;
use rfpmatrix_core::{ModelClient, ModelError, ModelSettings, Prompt, ResponseSchema};
use serde_json::{json, Value};

const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_AZURE_API_VERSION: &str = "2024-08-01-preview";

/// Where and how to reach the model
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub endpoint: Option<String>,
    pub api_key: String,
    /// Azure deployment name; switches to Azure URL and header conventions
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub model: String,
}

impl EndpointConfig {
    pub fn is_azure(&self) -> bool {
        self.deployment.is_some()
    }

    fn url(&self) -> String {
        let base = self
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_ENDPOINT)
            .trim_end_matches('/');
        match &self.deployment {
            Some(deployment) => format!(
                "{base}/openai/deployments/{deployment}/chat/completions?api-version={}",
                self.api_version.as_deref().unwrap_or(DEFAULT_AZURE_API_VERSION)
            ),
            None => format!("{base}/chat/completions"),
        }
    }
}

pub struct ChatCompletionsClient {
    agent: ureq::Agent,
    endpoint: EndpointConfig,
    settings: ModelSettings,
    url: String,
    name: String,
}

impl ChatCompletionsClient {
    pub fn new(endpoint: EndpointConfig, settings: ModelSettings) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        let name = endpoint
            .deployment
            .clone()
            .unwrap_or_else(|| endpoint.model.clone());
        Self {
            agent,
            url: endpoint.url(),
            endpoint,
            settings,
            name,
        }
    }

    fn request_body(&self, prompt: &Prompt, schema: &ResponseSchema) -> Value {
        let mut body = json!({
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_output_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": false,
                    "schema": schema.schema,
                }
            }
        });
        if !self.endpoint.is_azure() {
            body["model"] = json!(self.endpoint.model);
        }
        body
    }
}

impl ModelClient for ChatCompletionsClient {
    fn complete(&self, prompt: &Prompt, schema: &ResponseSchema) -> Result<Value, ModelError> {
        let request = self.agent.post(&self.url);
        let request = if self.endpoint.is_azure() {
            request.set("api-key", &self.endpoint.api_key)
        } else {
            request.set("Authorization", &format!("Bearer {}", self.endpoint.api_key))
        };

        tracing::debug!(schema = %schema.name, model = %self.name, "model request");
        let response = request
            .send_json(self.request_body(prompt, schema))
            .map_err(map_transport_error)?;
        let body: Value = response
            .into_json()
            .map_err(|e| ModelError::Malformed(format!("response body is not JSON: {e}")))?;

        completion_content(&body).and_then(|content| parse_structured_output(&content))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Text of the first choice; truncated or empty completions are malformed
pub fn completion_content(body: &Value) -> Result<String, ModelError> {
    let choice = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .ok_or_else(|| ModelError::Malformed("response has no choices".to_string()))?;

    if choice.get("finish_reason").and_then(Value::as_str) == Some("length") {
        return Err(ModelError::Malformed(
            "completion truncated at max_tokens".to_string(),
        ));
    }

    match choice.pointer("/message/content").and_then(Value::as_str) {
        Some(content) if !content.trim().is_empty() => Ok(content.to_string()),
        _ => Err(ModelError::Malformed("empty completion".to_string())),
    }
}

fn map_transport_error(error: ureq::Error) -> ModelError {
    match error {
        ureq::Error::Status(408, _) | ureq::Error::Status(504, _) => {
            ModelError::Timeout("endpoint returned a timeout status".to_string())
        }
        ureq::Error::Status(code, response) => {
            let detail = response.into_string().unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            ModelError::Transport(format!("HTTP {code}: {detail}"))
        }
        ureq::Error::Transport(transport) => {
            let message = transport.to_string();
            if message.contains("timed out") {
                ModelError::Timeout(message)
            } else {
                ModelError::Transport(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai() -> EndpointConfig {
        EndpointConfig {
            endpoint: None,
            api_key: "sk-test".to_string(),
            deployment: None,
            api_version: None,
            model: "gpt-4o".to_string(),
        }
    }

    #[test]
    fn test_urls() {
        assert_eq!(openai().url(), "https://api.openai.com/v1/chat/completions");

        let azure = EndpointConfig {
            endpoint: Some("https://contoso.openai.azure.com/".to_string()),
            deployment: Some("gpt4o-prod".to_string()),
            api_version: Some("2024-06-01".to_string()),
            ..openai()
        };
        assert_eq!(
            azure.url(),
            "https://contoso.openai.azure.com/openai/deployments/gpt4o-prod/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_request_body_carries_token_ceiling_and_schema() {
        let settings = ModelSettings {
            max_output_tokens: 32000,
            ..Default::default()
        };
        let client = ChatCompletionsClient::new(openai(), settings);
        let prompt = Prompt {
            system: "sys".to_string(),
            user: "user".to_string(),
        };
        let schema = ResponseSchema {
            name: "classify".to_string(),
            schema: json!({"type": "object"}),
        };

        let body = client.request_body(&prompt, &schema);
        assert_eq!(body["max_tokens"], json!(32000));
        assert_eq!(body["model"], json!("gpt-4o"));
        assert_eq!(body["response_format"]["type"], json!("json_schema"));
        assert_eq!(body["response_format"]["json_schema"]["name"], json!("classify"));
        assert_eq!(body["messages"][1]["content"], json!("user"));
        assert_eq!(client.name(), "gpt-4o");
    }

    #[test]
    fn test_completion_content() {
        let ok = json!({"choices": [{"message": {"content": "[1]"}, "finish_reason": "stop"}]});
        assert_eq!(completion_content(&ok).unwrap(), "[1]");

        let truncated = json!({"choices": [{"message": {"content": "[1"}, "finish_reason": "length"}]});
        assert!(matches!(completion_content(&truncated), Err(ModelError::Malformed(_))));

        let empty = json!({"choices": [{"message": {"content": "  "}}]});
        assert!(matches!(completion_content(&empty), Err(ModelError::Malformed(_))));

        assert!(matches!(completion_content(&json!({})), Err(ModelError::Malformed(_))));
    }
}
