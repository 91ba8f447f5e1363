use crate::error::TransportError;
use crate::{HistoryMessage, Outbound, Reply, Transport};
use serde::Deserialize;
use shellchat_core::Role;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Prior user/assistant exchanges sent with each request.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub history_window: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl TransportConfig {
    /// Defaults with the API key taken from the environment.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()),
            ..Self::default()
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

/// Messages API client. The blocking HTTP call runs on tokio's blocking pool.
pub struct AnthropicTransport {
    config: TransportConfig,
    agent: ureq::Agent,
}

impl AnthropicTransport {
    pub fn new(config: TransportConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { config, agent }
    }
}

#[async_trait::async_trait]
impl Transport for AnthropicTransport {
    async fn send(&self, request: &Outbound) -> Result<Reply, TransportError> {
        let api_key = self
            .config
            .api_key
            .clone()
            .ok_or(TransportError::MissingApiKey)?;
        let body = build_request_body(&self.config, request).to_string();
        let url = self.config.messages_url();
        let agent = self.agent.clone();

        debug!(model = %self.config.model, history = request.history.len(), "sending message");
        let (status, text) = tokio::task::spawn_blocking(move || post(&agent, &url, &api_key, body))
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !(200..300).contains(&status) {
            let body = api_error_message(&text).unwrap_or(text);
            warn!(status, "API request rejected");
            return Err(TransportError::Status { status, body });
        }
        let reply = parse_response(&text)?;
        debug!(tokens = reply.tokens, "reply received");
        Ok(reply)
    }
}

fn post(
    agent: &ureq::Agent,
    url: &str,
    api_key: &str,
    body: String,
) -> Result<(u16, String), ureq::Error> {
    let mut response = agent
        .post(url)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .header("content-type", "application/json")
        .send(body)?;
    let status = response.status().as_u16();
    let text = response.body_mut().read_to_string()?;
    Ok((status, text))
}

// ── Request ──

/// JSON body for `/v1/messages`: windowed history followed by the new message.
/// Adjacent messages from the same role are joined, since the API wants
/// roles to alternate.
pub fn build_request_body(config: &TransportConfig, request: &Outbound) -> serde_json::Value {
    let mut merged: Vec<(Role, String)> = Vec::new();
    let history = windowed(&request.history, config.history_window)
        .iter()
        .map(|m| (m.role, m.content.as_str()));
    for (role, content) in history.chain(std::iter::once((Role::User, request.message.as_str()))) {
        match merged.last_mut() {
            Some((last, text)) if *last == role => {
                text.push_str("\n\n");
                text.push_str(content);
            }
            _ => merged.push((role, content.to_string())),
        }
    }
    let messages: Vec<serde_json::Value> = merged
        .iter()
        .map(|(role, content)| serde_json::json!({ "role": role.as_str(), "content": content }))
        .collect();
    serde_json::json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "system": request.system_prompt,
        "messages": messages,
    })
}

/// Last `window` exchanges. The API wants the first message to be the user's.
fn windowed(history: &[HistoryMessage], window: usize) -> &[HistoryMessage] {
    let start = history.len().saturating_sub(window * 2);
    let mut tail = &history[start..];
    while let Some((first, rest)) = tail.split_first() {
        if first.role == Role::User {
            break;
        }
        tail = rest;
    }
    tail
}

// ── Response ──

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub fn parse_response(body: &str) -> Result<Reply, TransportError> {
    let parsed: MessagesResponse =
        serde_json::from_str(body).map_err(|e| TransportError::BadResponse(e.to_string()))?;
    let texts: Vec<String> = parsed
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect();
    if texts.is_empty() {
        return Err(TransportError::BadResponse(
            "response has no text content".to_string(),
        ));
    }
    Ok(Reply {
        text: texts.concat(),
        tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
    })
}

fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(str::to_string)
}
