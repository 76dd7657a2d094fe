//! LLM capability interface (§4.C): `Generate(messages, tools, options)` that
//! streams `text_delta` / `tool_call` / `done` events and can be cancelled
//! mid-flight. Mirrors the teacher's `ai::adapter::AIProviderAdapter` +
//! `AdapterRegistry` shape — one trait all providers implement, one registry
//! that selects among them by explicit id or by model-name prefix — but
//! narrowed to the single `generate` entry point this crate needs (no
//! embeddings, LoRA, or image generation) and reworked from a single
//! request/response call into an event stream so the Pipeline Orchestrator
//! can react to partial output (§4.E thinking-indicator timing, tool-call
//! interleaving) instead of blocking on the whole completion.

pub mod anthropic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider} request failed: {message}")]
    RequestFailed { provider: String, message: String },
    #[error("{provider} returned malformed response: {message}")]
    MalformedResponse { provider: String, message: String },
    #[error("generation cancelled")]
    Cancelled,
    #[error("no provider available for model {0:?}")]
    NoProvider(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on a `Role::Tool` message: the `call_id` this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_call_id: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_call_id: None }
    }
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: content.into(), tool_call_id: Some(call_id.into()) }
    }
}

/// Tool schema offered to the model, in the provider-neutral shape the Tool
/// Dispatcher's schema registry produces (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// One requested function call, emitted as a single `LlmEvent::ToolCall`
/// once the provider has finished streaming its arguments (providers buffer
/// tool-call argument deltas internally; partial tool-call JSON is never
/// exposed across this interface).
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub enum LlmEvent {
    TextDelta(String),
    ToolCall(ToolCallRequest),
    Done { usage: Usage },
}

/// One LLM provider backend (§4.C). `generate` streams events on `events`
/// until the response completes or `cancel` fires; it must send exactly one
/// `LlmEvent::Done` on success and return `Err` (without a trailing `Done`)
/// on failure or cancellation.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &'static str;

    fn default_model(&self) -> &str;

    /// Model name prefixes this provider claims, e.g. `["claude"]`.
    fn supported_model_prefixes(&self) -> &'static [&'static str];

    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        options: &GenerateOptions,
        events: mpsc::Sender<LlmEvent>,
        cancel: CancellationToken,
    ) -> Result<(), LlmError>;
}

/// Registry of LLM providers, selecting by explicit provider id or by
/// model-name prefix match, falling back to the first registered provider —
/// same three-tier selection order as `ai::adapter::AdapterRegistry::select`.
#[derive(Default)]
pub struct LlmRegistry {
    providers: Vec<Box<dyn LlmProvider>>,
}

impl LlmRegistry {
    pub fn new() -> Self {
        Self { providers: Vec::new() }
    }

    pub fn register(&mut self, provider: Box<dyn LlmProvider>) {
        self.providers.push(provider);
    }

    pub fn select(&self, preferred_provider: Option<&str>, model: Option<&str>) -> Option<&dyn LlmProvider> {
        if let Some(pref) = preferred_provider {
            if let Some(p) = self.providers.iter().find(|p| p.provider_id() == pref) {
                return Some(p.as_ref());
            }
        }

        if let Some(model_name) = model {
            let model_lower = model_name.to_ascii_lowercase();
            if let Some(p) = self
                .providers
                .iter()
                .find(|p| p.supported_model_prefixes().iter().any(|pre| model_lower.starts_with(pre)))
            {
                return Some(p.as_ref());
            }
        }

        self.providers.first().map(|p| p.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider(&'static str, &'static [&'static str]);

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn provider_id(&self) -> &'static str {
            self.0
        }
        fn default_model(&self) -> &str {
            "stub-model"
        }
        fn supported_model_prefixes(&self) -> &'static [&'static str] {
            self.1
        }
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
            _options: &GenerateOptions,
            events: mpsc::Sender<LlmEvent>,
            _cancel: CancellationToken,
        ) -> Result<(), LlmError> {
            let _ = events.send(LlmEvent::Done { usage: Usage::default() }).await;
            Ok(())
        }
    }

    #[test]
    fn test_select_by_model_prefix() {
        let mut registry = LlmRegistry::new();
        registry.register(Box::new(StubProvider("anthropic", &["claude"])));
        registry.register(Box::new(StubProvider("openai", &["gpt"])));
        let selected = registry.select(None, Some("gpt-4o")).unwrap();
        assert_eq!(selected.provider_id(), "openai");
    }

    #[test]
    fn test_select_falls_back_to_first_registered() {
        let mut registry = LlmRegistry::new();
        registry.register(Box::new(StubProvider("anthropic", &["claude"])));
        let selected = registry.select(None, Some("unknown-model")).unwrap();
        assert_eq!(selected.provider_id(), "anthropic");
    }

    #[test]
    fn test_explicit_provider_wins_over_model() {
        let mut registry = LlmRegistry::new();
        registry.register(Box::new(StubProvider("anthropic", &["claude"])));
        registry.register(Box::new(StubProvider("openai", &["gpt"])));
        let selected = registry.select(Some("anthropic"), Some("gpt-4o")).unwrap();
        assert_eq!(selected.provider_id(), "anthropic");
    }
}
