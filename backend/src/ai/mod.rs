//! LLM execution strategy.
//!
//! Custom rules can be answered by a chat-completion model (Azure OpenAI or
//! any OpenAI-compatible endpoint). Each answer must be one JSON object
//! `{ "<target>": "<string>" }`; anything else fails the row.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rulemap::ai::{AiConfig, LlmStrategy};
//!
//! let strategy = LlmStrategy::new(AiConfig::from_env()?)?;
//! let outcome = run(&records, &rules, &strategy, BatchOptions::default()).await;
//! ```
//!
//! Configuration comes from the environment (a `.env` file is loaded first):
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `AZURE_OPENAI_ENDPOINT` | Base URL (required) |
//! | `AZURE_OPENAI_API_KEY` | Key (required) |
//! | `AZURE_OPENAI_CHAT_DEPLOYMENT_NAME` | Deployment / model, default `gpt-4o` |
//! | `AZURE_OPENAI_API_VERSION` | Set for Azure URL layout, unset for OpenAI-compatible |
//! | `RULEMAP_LLM_TIMEOUT_SECS` | Per-request timeout, default 30 |

pub mod prompt;

use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::fmt;
use std::time::Duration;

use crate::api::logs::{log_info, log_success};
use crate::error::{AiError, AiResult, EvalResult, EvaluationError};
use crate::models::Record;
use crate::transform::rules::{Rule, RuleKind};
use crate::transform::strategy::{BatchState, DeterministicStrategy, ExecutionStrategy};
use crate::validation::validate_llm_response;

pub use prompt::{build_messages, system_prompt, user_prompt};

/// Default deployment name
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const MAX_TOKENS: u32 = 512;

// =============================================================================
// Configuration
// =============================================================================

/// Chat endpoint settings for one run.
#[derive(Clone)]
pub struct AiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Azure `api-version`; `None` means an OpenAI-compatible endpoint
    pub api_version: Option<String>,
    pub timeout_secs: u64,
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("api_version", &self.api_version)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AiConfig {
    pub fn new(endpoint: &str, api_key: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_version: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Read the configuration from the environment.
    pub fn from_env() -> AiResult<Self> {
        // Try loading .env file
        let _ = dotenvy::dotenv();

        let endpoint = non_empty_var("AZURE_OPENAI_ENDPOINT").ok_or(AiError::MissingConfig("AZURE_OPENAI_ENDPOINT"))?;
        let api_key = non_empty_var("AZURE_OPENAI_API_KEY").ok_or(AiError::MissingConfig("AZURE_OPENAI_API_KEY"))?;

        let mut config = Self::new(&endpoint, &api_key);
        if let Some(model) = non_empty_var("AZURE_OPENAI_CHAT_DEPLOYMENT_NAME") {
            config.model = model;
        }
        config.api_version = non_empty_var("AZURE_OPENAI_API_VERSION");
        if let Some(secs) = non_empty_var("RULEMAP_LLM_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            config.timeout_secs = secs;
        }

        Ok(config)
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_api_version(mut self, version: &str) -> Self {
        self.api_version = Some(version.to_string());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Chat-completions URL for this endpoint layout.
    pub fn chat_url(&self) -> String {
        match &self.api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.endpoint, self.model, version
            ),
            None => format!("{}/chat/completions", self.endpoint),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// =============================================================================
// Client
// =============================================================================

/// Chat-completions response structure
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Provider error payload
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Chat-completions client.
#[derive(Debug, Clone)]
pub struct AiClient {
    config: AiConfig,
    http: reqwest::Client,
}

impl AiClient {
    pub fn new(config: AiConfig) -> AiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AiError::RequestFailed(e.to_string()))?;
        Ok(Self { config, http })
    }

    /// Create a client from the environment
    pub fn from_env() -> AiResult<Self> {
        Self::new(AiConfig::from_env()?)
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    /// Send chat messages, return the text of the first choice.
    pub async fn complete(&self, messages: &[Value]) -> AiResult<String> {
        let mut body = serde_json::json!({
            "messages": messages,
            "temperature": 0,
            "max_tokens": MAX_TOKENS,
            "response_format": { "type": "json_object" }
        });

        let request = self.http.post(self.config.chat_url()).header("Content-Type", "application/json");
        let request = match self.config.api_version {
            Some(_) => request.header("api-key", &self.config.api_key),
            None => {
                body["model"] = Value::String(self.config.model.clone());
                request.bearer_auth(&self.config.api_key)
            }
        };

        let response = request.json(&body).send().await.map_err(|e| self.request_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.request_error(e))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorBody>(&body) {
                return Err(AiError::ApiError(error.error.message));
            }
            return Err(AiError::ApiError(format!("HTTP {}: {}", status, truncate(&body, 300))));
        }

        let response: ChatResponse =
            serde_json::from_str(&body).map_err(|e| AiError::InvalidResponse(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| AiError::InvalidResponse("Empty response".to_string()))
    }

    /// Round-trip a trivial request to check endpoint, key and deployment.
    pub async fn validate_connection(&self) -> AiResult<()> {
        log_info(format!("📡 Checking {} ({})...", self.config.endpoint, self.config.model));

        let messages = vec![
            serde_json::json!({ "role": "system", "content": "Reply with a JSON object." }),
            serde_json::json!({ "role": "user", "content": "Reply with exactly: {\"status\": \"ok\"}" }),
        ];
        let reply = self.complete(&messages).await?;

        log_success(format!("Endpoint answered ({} bytes)", reply.len()));
        Ok(())
    }

    fn request_error(&self, e: reqwest::Error) -> AiError {
        if e.is_timeout() {
            AiError::Timeout(self.config.timeout_secs)
        } else {
            AiError::RequestFailed(e.to_string())
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// =============================================================================
// Strategy
// =============================================================================

/// Answers custom rules with the chat model. Auto-generate rules stay on
/// the deterministic generator so batch uniqueness holds.
#[derive(Debug, Clone)]
pub struct LlmStrategy {
    client: AiClient,
}

impl LlmStrategy {
    pub fn new(config: AiConfig) -> AiResult<Self> {
        Ok(Self {
            client: AiClient::new(config)?,
        })
    }

    pub fn from_client(client: AiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AiClient {
        &self.client
    }
}

impl ExecutionStrategy for LlmStrategy {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn execute(&self, record: &Record, rule: &Rule, state: &mut BatchState) -> EvalResult<String> {
        match &rule.kind {
            RuleKind::Custom { .. } => {
                let messages = build_messages(record, rule);
                let reply = self
                    .client
                    .complete(&messages)
                    .await
                    .map_err(|e| EvaluationError::Strategy {
                        target: rule.target_column.clone(),
                        message: e.to_string(),
                    })?;
                parse_response(&rule.target_column, &reply)
            }
            RuleKind::AutoGenerate { .. } => DeterministicStrategy.execute(record, rule, state).await,
            other => Err(EvaluationError::Unsupported {
                kind: other.code(),
                target: rule.target_column.clone(),
            }),
        }
    }
}

/// Parse a custom-rule answer.
///
/// The whole reply must be one JSON object whose only property is `target`
/// with a string value.
pub fn parse_response(target: &str, reply: &str) -> EvalResult<String> {
    let invalid = |message: String| EvaluationError::InvalidResponse {
        target: target.to_string(),
        message,
    };

    let value: Value = serde_json::from_str(reply.trim())
        .map_err(|e| invalid(format!("not a JSON object ({}): {}", e, truncate(reply, 200))))?;

    validate_llm_response(target, &value).map_err(|errors| invalid(errors.join("; ")))?;

    value
        .get(target)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("missing '{}'", target)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_response() {
        assert_eq!(parse_response("Dob", r#" {"Dob": "2024/07/MAR"} "#).unwrap(), "2024/07/MAR");
        assert_eq!(parse_response("Dob", r#"{"Dob": ""}"#).unwrap(), "");
    }

    #[test]
    fn test_parse_rejects_markdown_and_prose() {
        let fenced = "```json\n{\"Dob\": \"2024/07/MAR\"}\n```";
        assert!(matches!(
            parse_response("Dob", fenced),
            Err(EvaluationError::InvalidResponse { .. })
        ));
        assert!(parse_response("Dob", "Here you go: {\"Dob\": \"x\"}").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(parse_response("Dob", r#"{"Dob": 12}"#).is_err());
        assert!(parse_response("Dob", r#"{"Other": "x"}"#).is_err());
        assert!(parse_response("Dob", r#"{"Dob": "x", "Note": "y"}"#).is_err());
    }

    #[test]
    fn test_azure_url_layout() {
        let config = AiConfig::new("https://acme.openai.azure.com/", "k").with_api_version("2024-02-01");
        assert_eq!(
            config.chat_url(),
            "https://acme.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-02-01"
        );
    }

    #[test]
    fn test_openai_compatible_url_layout() {
        let config = AiConfig::new("http://localhost:8080/v1", "k").with_model("llama");
        assert_eq!(config.chat_url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_debug_hides_key() {
        let config = AiConfig::new("https://x", "secret-key");
        assert!(!format!("{:?}", config).contains("secret-key"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_row() {
        let config = AiConfig::new("http://127.0.0.1:9", "k").with_timeout(2);
        let strategy = LlmStrategy::new(config).unwrap();
        let rule = Rule::custom("Dob", None, "anything");

        let result = strategy.execute(&Record::new(), &rule, &mut BatchState::new()).await;
        assert!(matches!(result, Err(EvaluationError::Strategy { .. })));
    }

    #[tokio::test]
    async fn test_autogenerate_stays_local() {
        let config = AiConfig::new("http://127.0.0.1:9", "k");
        let strategy = LlmStrategy::new(config).unwrap();
        let rule = Rule::auto_generate("Key", None, "ID-{seq}");

        let id = strategy.execute(&Record::new(), &rule, &mut BatchState::new()).await.unwrap();
        assert_eq!(id, "ID-1");
    }
}
