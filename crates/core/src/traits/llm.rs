//! Language-model client seam used by the LLM-backed planner.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Text completion over some model provider.
///
/// Transport and provider failures come back as `Err`; the planner maps
/// them to a transport planning error.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Raw completion text, possibly fenced or wrapped in prose.
    pub content: String,
    pub finish_reason: String,
}

impl LlmResponse {
    /// A response that ended normally.
    pub fn stop(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: "stop".to_string(),
        }
    }
}
