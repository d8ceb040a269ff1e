// Oracle client
//
// Sends prompts to an OpenAI-compatible chat-completions endpoint and
// returns the raw completion text. Recovery of structure from that text is
// the interpreter's job (extract.rs), not the client's.

use serde::{Deserialize, Serialize};

/// Error from the oracle backend.
#[derive(Debug, Clone)]
pub enum OracleError {
    /// No endpoint configured
    NotConfigured(String),
    /// Network error
    NetworkError(String),
    /// API error response
    ApiError { status: u16, message: String },
    /// Backend returned an unexpected shape
    InvalidResponse(String),
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::NotConfigured(msg) => write!(f, "Oracle not configured: {}", msg),
            OracleError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            OracleError::ApiError { status, message } => {
                write!(f, "API error ({}): {}", status, message)
            }
            OracleError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for OracleError {}

/// The generative backend, seen from the core.
///
/// Implementations may block for seconds; callers run them off the
/// request-handling thread when that matters.
pub trait Oracle: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Connection settings for the HTTP oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Chat-completions URL (e.g., "https://api.openai.com/v1/chat/completions").
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

// ============================================================================
// Chat-completions API types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequestMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Blocking HTTP oracle against an OpenAI-compatible endpoint.
pub struct HttpOracle {
    config: OracleConfig,
    client: reqwest::blocking::Client,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        if config.endpoint.is_empty() {
            return Err(OracleError::NotConfigured("empty endpoint".to_string()));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| OracleError::NetworkError(e.to_string()))?;
        Ok(HttpOracle { config, client })
    }
}

impl Oracle for HttpOracle {
    fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatRequestMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            // Low temperature for consistent structured output
            temperature: 0.2,
            max_tokens: 2048,
        };

        log::debug!("Oracle request: model={}, {} prompt bytes", self.config.model, prompt.len());

        // Local backends (e.g. Ollama) take no key; hosted ones get Bearer auth
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = builder
            .send()
            .map_err(|e| OracleError::NetworkError(e.to_string()))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().unwrap_or_default();
            if let Ok(error) = serde_json::from_str::<ApiError>(&error_text) {
                return Err(OracleError::ApiError {
                    status: status.as_u16(),
                    message: error.error.message,
                });
            }
            return Err(OracleError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body: ChatResponse = response
            .json()
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        let content = body
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| OracleError::InvalidResponse("No choices in response".to_string()))?;

        log::debug!("Oracle response: {} bytes", content.len());
        Ok(content)
    }
}
