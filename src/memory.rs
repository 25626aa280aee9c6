//! # Context Prefetch
//!
//! Before a voice session opens, the remote memory store is asked for a short
//! natural-language digest of the user's history. That Context Summary is
//! embedded verbatim in the session's system instruction.
//!
//! ## Failure Policy:
//! Prefetch never fails the caller. Whatever goes wrong (missing credentials,
//! network error, remote error, malformed answer) a fixed neutral sentence is
//! used instead and the session starts without memory context.
//!
//! The same client also appends messages to the store (`add_message`), which
//! the HTTP layer exposes for the dashboard.

use crate::config::MemoryConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Used when no credentials are configured.
pub const NOT_CONFIGURED_SUMMARY: &str = "No stored memory yet; continuing with current data only.";

/// Used when the store answered but had nothing relevant.
pub const NO_MATCH_SUMMARY: &str = "No matching history found.";

/// Used when the store could not be reached or answered with an error.
pub const UNAVAILABLE_SUMMARY: &str =
    "Memory retrieval is temporarily unavailable; analysis is based on current data.";

/// Why a memory lookup failed.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("memory store is not configured")]
    NotConfigured,

    #[error("memory request failed: {0}")]
    Request(String),

    #[error("memory store returned HTTP {0}")]
    Status(u16),

    #[error("invalid memory response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ContextError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            ContextError::Status(status.as_u16())
        } else if err.is_decode() {
            ContextError::InvalidResponse(err.to_string())
        } else {
            ContextError::Request(err.to_string())
        }
    }
}

/// A remote store able to answer context questions.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// `Ok(None)` means the store answered but found nothing.
    async fn search_context(&self, query: &str) -> Result<Option<String>, ContextError>;
}

/// Fetch the Context Summary for a new session, never failing.
pub async fn fetch_context_summary(provider: &dyn ContextProvider, query: &str) -> String {
    match provider.search_context(query).await {
        Ok(Some(memory)) if !memory.trim().is_empty() => memory,
        Ok(_) => NO_MATCH_SUMMARY.to_string(),
        Err(ContextError::NotConfigured) => {
            debug!("Memory store not configured, using neutral context");
            NOT_CONFIGURED_SUMMARY.to_string()
        }
        Err(e) => {
            warn!(error = %e, "Context prefetch failed, using fallback summary");
            UNAVAILABLE_SUMMARY.to_string()
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchMemoryRequest<'a> {
    query: &'a str,
    user_id: &'a str,
    conversation_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchMemoryResponse {
    #[serde(default)]
    memory: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddMessageRequest<'a> {
    user_id: &'a str,
    conversation_id: &'a str,
    messages: Vec<MemoryMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct MemoryMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// HTTP client for the memory/context store.
#[derive(Clone)]
pub struct MemoryClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    user_id: String,
    conversation_id: String,
    save_conversation_id: String,
}

impl MemoryClient {
    pub fn new(config: &MemoryConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, timeout_secs = config.timeout_secs, "Memory client build failed, requests have no timeout");
                Client::new()
            });

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            user_id: config.user_id.clone(),
            conversation_id: config.conversation_id.clone(),
            save_conversation_id: config.save_conversation_id.clone(),
        }
    }

    /// Credentials are present and not a placeholder.
    pub fn is_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty() && !key.contains("your-key"))
            .unwrap_or(false)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Token {}", key)),
            None => request,
        }
    }

    /// Append one user message to the saved conversation.
    pub async fn add_message(&self, content: &str) -> Result<(), ContextError> {
        if !self.is_configured() {
            return Err(ContextError::NotConfigured);
        }

        let body = AddMessageRequest {
            user_id: &self.user_id,
            conversation_id: &self.save_conversation_id,
            messages: vec![MemoryMessage {
                role: "user",
                content,
            }],
        };

        self.authorized(self.client.post(format!("{}/add/message", self.base_url)))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        debug!(bytes = content.len(), "Saved message to memory store");
        Ok(())
    }
}

#[async_trait]
impl ContextProvider for MemoryClient {
    async fn search_context(&self, query: &str) -> Result<Option<String>, ContextError> {
        if !self.is_configured() {
            return Err(ContextError::NotConfigured);
        }

        let body = SearchMemoryRequest {
            query,
            user_id: &self.user_id,
            conversation_id: &self.conversation_id,
        };

        let response: SearchMemoryResponse = self
            .authorized(self.client.post(format!("{}/search/memory", self.base_url)))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.memory)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Context provider with a canned answer.
    pub enum StaticContext {
        Answer(String),
        Empty,
        Fail,
    }

    #[async_trait]
    impl ContextProvider for StaticContext {
        async fn search_context(&self, _query: &str) -> Result<Option<String>, ContextError> {
            match self {
                StaticContext::Answer(text) => Ok(Some(text.clone())),
                StaticContext::Empty => Ok(None),
                StaticContext::Fail => Err(ContextError::Request("connection reset".to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StaticContext;
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_summary_passes_answer_through() {
        let provider = StaticContext::Answer("WBC recovering".to_string());
        assert_eq!(fetch_context_summary(&provider, "q").await, "WBC recovering");
    }

    #[tokio::test]
    async fn test_summary_fallbacks() {
        assert_eq!(fetch_context_summary(&StaticContext::Empty, "q").await, NO_MATCH_SUMMARY);
        assert_eq!(fetch_context_summary(&StaticContext::Fail, "q").await, UNAVAILABLE_SUMMARY);
    }

    #[tokio::test]
    async fn test_unconfigured_client_uses_neutral_summary() {
        let client = MemoryClient::new(&AppConfig::default().memory);
        assert!(!client.is_configured());
        assert_eq!(fetch_context_summary(&client, "q").await, NOT_CONFIGURED_SUMMARY);
        assert!(matches!(client.add_message("hello").await, Err(ContextError::NotConfigured)));
    }

    #[test]
    fn test_placeholder_key_is_not_configured() {
        let mut config = AppConfig::default().memory;
        config.api_key = Some("mpg-your-key".to_string());
        assert!(!MemoryClient::new(&config).is_configured());
        config.api_key = Some("mpg-real".to_string());
        assert!(MemoryClient::new(&config).is_configured());
    }

    #[tokio::test]
    async fn test_unreachable_store_falls_back() {
        let mut config = AppConfig::default().memory;
        config.base_url = "http://127.0.0.1:1".to_string();
        config.api_key = Some("mpg-real".to_string());
        config.timeout_secs = 2;
        let client = MemoryClient::new(&config);
        assert_eq!(fetch_context_summary(&client, "q").await, UNAVAILABLE_SUMMARY);
    }
}
