//! Review summaries — optional AI enrichment with a local fallback.
//!
//! The external agent is never required for a state transition: every
//! caller pairs `Summarizer::summarize` with `fallback_summary`. The HTTP
//! client carries a strict timeout so a slow agent degrades to the
//! deterministic local format instead of stalling the conversation.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Produces the structured summary shown at the review step.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        category_display: &str,
        description: &str,
    ) -> Result<String, AgentError>;
}

/// Deterministic local summary, used when no agent is configured or the
/// agent call fails.
pub fn fallback_summary(category_display: &str, description: &str) -> String {
    format!(
        "📋 *Resumo da solicitação*\n\n🏢 Setor: {category_display}\n📝 Descrição: {}",
        description.trim()
    )
}

/// HTTP client for the external conversational agent.
pub struct AgentSummarizer {
    config: AgentConfig,
    client: reqwest::Client,
}

impl AgentSummarizer {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Summarizer for AgentSummarizer {
    async fn summarize(
        &self,
        category_display: &str,
        description: &str,
    ) -> Result<String, AgentError> {
        let url = format!(
            "{}/agents/{}/execute",
            self.config.base_url.trim_end_matches('/'),
            self.config.agent_id
        );
        let prompt = format!(
            "Resuma a solicitação de suporte abaixo em até três linhas, \
             mantendo dados concretos (pedidos, valores, modelos).\n\
             Setor: {category_display}\n\
             Solicitação: {description}"
        );
        let payload = serde_json::json!({
            "messages": [{ "role": "user", "content": prompt }],
            "wait_execution": true,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.config.token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout
                } else {
                    AgentError::RequestFailed(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(AgentError::RequestFailed(format!(
                "agent returned {}",
                resp.status()
            )));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;
        let output = data
            .get("responses")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("output"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AgentError::InvalidResponse("missing responses[0].output".into()))?;

        debug!("Agent summary received");
        Ok(output.to_string())
    }
}
