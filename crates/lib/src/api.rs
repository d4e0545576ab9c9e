//! REST client for the assistant backend (chat, tools, health, sandbox, Gmail).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::tab::{DebugInfo, ParamSpec, ToolCall};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8090";
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
pub const CONVERSATION_TOO_LONG: &str = "This conversation is too long. Please start a new tab.";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP error! status: {status}")]
    Http { status: u16 },
    /// 409 from the chat endpoint: the server-side thread hit its length limit.
    #[error("{0}")]
    ConversationTooLong(String),
    #[error("{0}")]
    Api(String),
    #[error("request was abandoned before a response arrived")]
    Cancelled,
}

/// Body of `POST /api/v1/chat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub thread_id: Option<String>,
    pub debug_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    answer: String,
    #[serde(default)]
    #[allow(dead_code)]
    status: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    debug_info: Option<DebugInfo>,
}

/// Result of one successful chat turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub answer: String,
    pub thread_id: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub debug_info: Option<DebugInfo>,
}

impl From<ChatResponse> for ChatReply {
    fn from(r: ChatResponse) -> Self {
        Self {
            answer: r.answer,
            thread_id: r.thread_id.filter(|t| !t.is_empty()),
            tool_calls: r.tool_calls.unwrap_or_default(),
            debug_info: r.debug_info,
        }
    }
}

/// Tool as listed by `GET /api/v1/tools`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxRequest {
    pub tool_name: String,
    pub args: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SandboxExecution {
    pub success: bool,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GmailStatus {
    pub authenticated: bool,
    #[serde(default)]
    pub has_credentials: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GmailAuthResponse {
    auth_url: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: String,
}

/// Anything that can run a chat turn. The HTTP client is the production implementation.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply, ApiError>;
}

/// Client for the backend REST API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    health_timeout: Duration,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: Option<String>, health_timeout: Option<Duration>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            health_timeout: health_timeout.unwrap_or(DEFAULT_HEALTH_TIMEOUT),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST /api/v1/chat.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, ApiError> {
        let url = format!("{}/api/v1/chat", self.base_url);
        let res = self.client.post(&url).json(request).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            log::error!("chat request failed: {} {}", status, body);
            if status == reqwest::StatusCode::CONFLICT {
                return Err(ApiError::ConversationTooLong(conflict_detail(&body)));
            }
            return Err(ApiError::Http {
                status: status.as_u16(),
            });
        }
        let data: ChatResponse = res.json().await?;
        Ok(data.into())
    }

    /// GET /api/v1/tools. A missing or malformed `tools` field reads as no tools.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, ApiError> {
        let url = format!("{}/api/v1/tools", self.base_url);
        log::debug!("fetching tools from {}", url);
        let res = self.client.get(&url).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api(format!(
                "HTTP error! status: {} - {}",
                status.as_u16(),
                body
            )));
        }
        let data: serde_json::Value = res.json().await?;
        Ok(parse_tools(&data))
    }

    /// GET /health with a fixed timeout. Any failure counts as unhealthy.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        let res = match self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("health check failed: {}", e);
                return false;
            }
        };
        if !res.status().is_success() {
            log::warn!("health check returned {}", res.status());
            return false;
        }
        match res.json::<HealthResponse>().await {
            Ok(h) => h.status == "healthy",
            Err(e) => {
                log::warn!("health check returned unreadable body: {}", e);
                false
            }
        }
    }

    /// POST /api/v1/sandbox/execute.
    pub async fn execute_in_sandbox(
        &self,
        request: &SandboxRequest,
    ) -> Result<SandboxExecution, ApiError> {
        let url = format!("{}/api/v1/sandbox/execute", self.base_url);
        let res = self.client.post(&url).json(request).send().await?;
        if !res.status().is_success() {
            return Err(ApiError::Http {
                status: res.status().as_u16(),
            });
        }
        Ok(res.json().await?)
    }

    /// GET /api/v1/gmail/status.
    pub async fn gmail_status(&self) -> Result<GmailStatus, ApiError> {
        let url = format!("{}/api/v1/gmail/status", self.base_url);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(ApiError::Http {
                status: res.status().as_u16(),
            });
        }
        Ok(res.json().await?)
    }

    /// GET /api/v1/gmail/auth. Returns the Google consent URL.
    pub async fn gmail_auth_url(&self, redirect_uri: &str) -> Result<String, ApiError> {
        let url = format!("{}/api/v1/gmail/auth", self.base_url);
        let res = self
            .client
            .get(&url)
            .query(&[("redirect_uri", redirect_uri)])
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ApiError::Http {
                status: res.status().as_u16(),
            });
        }
        let data: GmailAuthResponse = res.json().await?;
        Ok(data.auth_url)
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply, ApiError> {
        self.chat(request).await
    }
}

/// Message for a 409: the body's string `detail` when present, else the default text.
fn conflict_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| CONVERSATION_TOO_LONG.to_string())
}

fn parse_tools(data: &serde_json::Value) -> Vec<Tool> {
    let Some(arr) = data.get("tools").and_then(|t| t.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|t| match serde_json::from_value::<Tool>(t.clone()) {
            Ok(tool) => Some(tool),
            Err(e) => {
                log::warn!("skipping unreadable tool entry: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conflict_detail_prefers_body_detail() {
        assert_eq!(
            conflict_detail(r#"{"detail":"Thread limit reached"}"#),
            "Thread limit reached"
        );
        assert_eq!(conflict_detail("not json"), CONVERSATION_TOO_LONG);
        assert_eq!(conflict_detail(r#"{"detail":{"code":1}}"#), CONVERSATION_TOO_LONG);
    }

    #[test]
    fn parse_tools_tolerates_missing_array() {
        assert!(parse_tools(&json!({})).is_empty());
        assert!(parse_tools(&json!({ "tools": null })).is_empty());
        assert!(parse_tools(&json!({ "tools": "x" })).is_empty());
    }

    #[test]
    fn parse_tools_reads_entries() {
        let tools = parse_tools(&json!({
            "tools": [
                {
                    "name": "get_projects",
                    "description": "List projects",
                    "parameters": { "limit": { "type": "integer", "description": "max" } },
                    "required": ["limit"]
                },
                { "name": "ping" },
                { "description": "no name" }
            ]
        }));
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].parameters["limit"].typ.as_deref(), Some("integer"));
        assert_eq!(tools[0].required, vec!["limit".to_string()]);
        assert!(tools[1].parameters.is_empty());
    }

    #[test]
    fn chat_response_maps_to_reply() {
        let data: ChatResponse = serde_json::from_value(json!({
            "answer": "hi",
            "status": "success",
            "thread_id": "t1",
            "tool_calls": [{ "name": "search", "args": { "q": "rust" }, "schema": null }],
            "debug_info": null
        }))
        .unwrap();
        let reply: ChatReply = data.into();
        assert_eq!(reply.answer, "hi");
        assert_eq!(reply.thread_id.as_deref(), Some("t1"));
        assert_eq!(reply.tool_calls[0].args["q"], "rust");
        assert!(reply.tool_calls[0].schema.is_none());
        assert!(reply.debug_info.is_none());
    }

    #[test]
    fn chat_request_wire_shape() {
        let req = ChatRequest {
            message: "hello".to_string(),
            thread_id: None,
            debug_mode: false,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({ "message": "hello", "thread_id": null, "debug_mode": false })
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let c = ApiClient::new(Some("http://example.test/".to_string()), None);
        assert_eq!(c.base_url(), "http://example.test");
        assert_eq!(ApiClient::new(None, None).base_url(), DEFAULT_BASE_URL);
    }
}
