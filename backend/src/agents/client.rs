// Agent client - HTTP calls to the agent service with backend fallback

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::AgentError;
use crate::config::AgentConfig;

/// Body posted to both agent endpoints
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub agent: String,
    pub task: String,
    pub context: Value,
}

/// One call to an external agent. Implementations must report failure
/// rather than return a synthetic result.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn call(&self, request: &AgentRequest) -> Result<Value, AgentError>;
}

pub struct HttpAgentClient {
    http: reqwest::Client,
    service_url: String,
    backend_api_url: String,
    api_token: String,
}

impl HttpAgentClient {
    /// No client-side timeout: the manager bounds every call itself.
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            service_url: config.service_url.clone(),
            backend_api_url: config.backend_api_url.clone(),
            api_token: config.api_token.clone(),
        }
    }

    async fn post(&self, url: &str, request: &AgentRequest) -> Result<Value, String> {
        let mut builder = self.http.post(url).json(request);
        if !self.api_token.is_empty() {
            builder = builder.bearer_auth(&self.api_token);
        }

        let response = builder.send().await.map_err(|e| format!("request failed: {}", e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| format!("unreadable body: {}", e))?;

        if !status.is_success() {
            return Err(format!("HTTP {}: {}", status.as_u16(), text.trim()));
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        match body_failure(&body) {
            Some(reason) => Err(reason),
            None => Ok(body),
        }
    }
}

/// Failure reported inside a 2xx body.
fn body_failure(body: &Value) -> Option<String> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let detail = body
            .get("error")
            .or_else(|| body.get("message"))
            .map(describe)
            .unwrap_or_else(|| "success=false".to_string());
        return Some(format!("agent reported failure: {}", detail));
    }

    if let Some(status) = body.get("status").and_then(Value::as_str) {
        if status.eq_ignore_ascii_case("error") || status.eq_ignore_ascii_case("failed") {
            let detail = body.get("error").map(describe).unwrap_or_else(|| status.to_string());
            return Some(format!("agent reported failure: {}", detail));
        }
    }

    match body.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(error) => Some(format!("agent returned error: {}", describe(error))),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn call(&self, request: &AgentRequest) -> Result<Value, AgentError> {
        let endpoints = [
            ("agent service", self.service_url.as_str()),
            ("backend API", self.backend_api_url.as_str()),
        ];
        let mut failures = Vec::new();

        for (label, url) in endpoints.iter().filter(|(_, url)| !url.is_empty()) {
            debug!("Calling {} for agent '{}'", label, request.agent);

            match self.post(url, request).await {
                Ok(body) => return Ok(body),
                Err(reason) => {
                    warn!("{} failed for agent '{}': {}", label, request.agent, reason);
                    failures.push(format!("{}: {}", label, reason));
                }
            }
        }

        if failures.is_empty() {
            return Err(AgentError::NotConfigured);
        }

        Err(AgentError::CallFailed(failures.join("; ")))
    }
}
