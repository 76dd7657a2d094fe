//! Tool Dispatcher (§4.F): function-call schema registry plus dispatch to
//! the Flight Search HTTP service, with timeout/retry/fallback and progress
//! streaming. The schema registry wraps `tool_parsing::codec::ToolNameCodec`
//! so tool names survive whatever mangling an LLM applies to them (dots,
//! hyphens, double underscores, `$FUNCTIONS.` prefixes — see
//! `tool_parsing::codec` test suite), the same way the teacher's codec
//! already tolerates mangled persona/skill names.

pub mod flight_search;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::llm::ToolSpec;
use crate::tool_parsing::codec::ToolNameCodec;
use crate::voice::types::{ToolCall, ToolCallStatus};

pub use flight_search::FlightSearchClient;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool {0} timed out")]
    Timeout(String),
    #[error("tool {tool} failed: {message}")]
    ProviderFailed { tool: String, message: String },
}

/// Progress emitted while a tool call is in flight, to be forwarded to the
/// data channel as `transcription{system}` (§4.F).
#[derive(Debug, Clone)]
pub struct ToolProgress {
    pub call_id: uuid::Uuid,
    pub message: String,
}

/// One registered tool: its LLM-facing schema plus the async closure that
/// executes it.
pub struct RegisteredTool {
    pub spec: ToolSpec,
    pub dispatch: Arc<dyn Fn(Value, tokio::sync::mpsc::Sender<ToolProgress>) -> BoxedToolFuture + Send + Sync>,
}

type BoxedToolFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, ToolError>> + Send>>;

/// Schema registry + dispatcher (§4.F). Holds one `RegisteredTool` per tool
/// name and a `ToolNameCodec` to resolve whatever mangled name the LLM
/// actually produced back to a registered entry.
pub struct ToolDispatcher {
    codec: ToolNameCodec,
    tools: std::collections::HashMap<String, RegisteredTool>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self { codec: ToolNameCodec::new(), tools: std::collections::HashMap::new() }
    }

    pub fn register(&mut self, tool: RegisteredTool) {
        self.codec.register(&tool.spec.name);
        self.tools.insert(tool.spec.name.clone(), tool);
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec.clone()).collect()
    }

    /// Dispatch a tool call by the (possibly mangled) name the LLM produced.
    /// Increments `call.attempt_count` and updates `call.status` in place.
    pub async fn dispatch(
        &self,
        call: &mut ToolCall,
        progress: tokio::sync::mpsc::Sender<ToolProgress>,
    ) -> Result<Value, ToolError> {
        let resolved_name = self.codec.decode(&call.name);
        let tool = self
            .tools
            .get(&resolved_name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        call.attempt_count += 1;
        call.status = ToolCallStatus::Pending;

        let result = (tool.dispatch)(call.arguments.clone(), progress).await;
        call.status = match &result {
            Ok(_) => ToolCallStatus::Ok,
            Err(ToolError::Timeout(_)) => ToolCallStatus::Timeout,
            Err(_) => ToolCallStatus::Error,
        };
        result
    }
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_tool(name: &str) -> RegisteredTool {
        RegisteredTool {
            spec: ToolSpec { name: name.to_string(), description: "test".into(), parameters: json!({}) },
            dispatch: Arc::new(|args, _progress| Box::pin(async move { Ok(args) })),
        }
    }

    #[tokio::test]
    async fn test_dispatch_resolves_mangled_name() {
        let mut dispatcher = ToolDispatcher::new();
        dispatcher.register(noop_tool("search/flights"));
        let (tx, _rx) = tokio::sync::mpsc::channel(4);

        let mut call = ToolCall::new("search_flights", json!({"origin": "MIA"}));
        let result = dispatcher.dispatch(&mut call, tx).await;
        assert!(result.is_ok());
        assert_eq!(call.status, ToolCallStatus::Ok);
        assert_eq!(call.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool_errors() {
        let dispatcher = ToolDispatcher::new();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let mut call = ToolCall::new("does_not_exist", json!({}));
        let result = dispatcher.dispatch(&mut call, tx).await;
        assert!(matches!(result, Err(ToolError::UnknownTool(_))));
    }
}
