//! Anthropic (Claude) LLM provider (§4.C), reworked from the non-streaming
//! `ai::anthropic_adapter::AnthropicAdapter` into an SSE-streaming one: POSTs
//! to `/v1/messages` with `"stream": true` and forwards
//! `content_block_delta`/`content_block_start`/`message_delta` server-sent
//! events as `LlmEvent`s instead of waiting for the full JSON body.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::secrets::get_secret;

use super::{ChatMessage, GenerateOptions, LlmError, LlmEvent, LlmProvider, Role, ToolCallRequest, ToolSpec, Usage};

const CLAUDE_SONNET_4_5: &str = "claude-sonnet-4-5-20250929";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("failed to build anthropic http client");
        Self { client }
    }

    fn format_messages(&self, messages: &[ChatMessage]) -> (Vec<Value>, Option<String>) {
        let mut result = Vec::new();
        let mut system_prompt = None;

        for msg in messages {
            match msg.role {
                Role::System => {
                    system_prompt = Some(msg.content.clone());
                }
                Role::Tool => {
                    result.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                            "content": msg.content,
                        }],
                    }));
                }
                Role::User => {
                    result.push(json!({"role": "user", "content": msg.content}));
                }
                Role::Assistant => {
                    result.push(json!({"role": "assistant", "content": msg.content}));
                }
            }
        }

        (result, system_prompt)
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseEvent {
    MessageStart {
        #[allow(dead_code)]
        message: Value,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[allow(dead_code)]
        delta: Value,
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockStart {
    Text { text: String },
    ToolUse { id: String, name: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    output_tokens: u32,
}

struct PendingToolUse {
    id: String,
    name: String,
    json_buf: String,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_id(&self) -> &'static str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        CLAUDE_SONNET_4_5
    }

    fn supported_model_prefixes(&self) -> &'static [&'static str] {
        &["claude"]
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        options: &GenerateOptions,
        events: mpsc::Sender<LlmEvent>,
        cancel: CancellationToken,
    ) -> Result<(), LlmError> {
        let api_key = get_secret("ANTHROPIC_API_KEY").ok_or_else(|| LlmError::RequestFailed {
            provider: "anthropic".into(),
            message: "ANTHROPIC_API_KEY not configured".into(),
        })?;

        let model = options.model.as_deref().unwrap_or(CLAUDE_SONNET_4_5);
        let (chat_messages, system_prompt) = self.format_messages(messages);

        let mut body = json!({
            "model": model,
            "messages": chat_messages,
            "max_tokens": options.max_tokens.unwrap_or(1024),
            "temperature": options.temperature.unwrap_or(0.7),
            "stream": true,
        });
        if let Some(sys) = system_prompt {
            body["system"] = json!(sys);
        }
        if !tools.is_empty() {
            let anthropic_tools: Vec<Value> = tools
                .iter()
                .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.parameters}))
                .collect();
            body["tools"] = json!(anthropic_tools);
        }

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed { provider: "anthropic".into(), message: e.to_string() })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: "anthropic".into(),
                message: format!("{status}: {text}"),
            });
        }

        let mut byte_stream = response.bytes_stream();
        let mut line_buf = String::new();
        let mut pending_tool: Option<PendingToolUse> = None;
        let mut usage = Usage::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(LlmError::Cancelled);
                }
                chunk = byte_stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let chunk = chunk.map_err(|e| LlmError::RequestFailed {
                        provider: "anthropic".into(),
                        message: e.to_string(),
                    })?;
                    line_buf.push_str(&String::from_utf8_lossy(&chunk));

                    while let Some(pos) = line_buf.find('\n') {
                        let line = line_buf[..pos].trim_end_matches('\r').to_string();
                        line_buf.drain(..=pos);

                        let Some(data) = line.strip_prefix("data: ") else { continue };
                        if data == "[DONE]" {
                            continue;
                        }
                        let Ok(event) = serde_json::from_str::<SseEvent>(data) else { continue };

                        match event {
                            SseEvent::ContentBlockStart { index: _, content_block: ContentBlockStart::Text { text } } => {
                                if !text.is_empty() {
                                    let _ = events.send(LlmEvent::TextDelta(text)).await;
                                }
                            }
                            SseEvent::ContentBlockStart { index: _, content_block: ContentBlockStart::ToolUse { id, name } } => {
                                pending_tool = Some(PendingToolUse { id, name, json_buf: String::new() });
                            }
                            SseEvent::ContentBlockDelta { index: _, delta: ContentDelta::TextDelta { text } } => {
                                let _ = events.send(LlmEvent::TextDelta(text)).await;
                            }
                            SseEvent::ContentBlockDelta { index: _, delta: ContentDelta::InputJsonDelta { partial_json } } => {
                                if let Some(tool) = pending_tool.as_mut() {
                                    tool.json_buf.push_str(&partial_json);
                                }
                            }
                            SseEvent::ContentBlockStop { index: _ } => {
                                if let Some(tool) = pending_tool.take() {
                                    let arguments: Value = serde_json::from_str(&tool.json_buf).unwrap_or(Value::Null);
                                    let _ = events
                                        .send(LlmEvent::ToolCall(ToolCallRequest {
                                            call_id: tool.id,
                                            name: tool.name,
                                            arguments,
                                        }))
                                        .await;
                                }
                            }
                            SseEvent::MessageDelta { delta: _, usage: Some(u) } => {
                                usage.output_tokens = u.output_tokens;
                            }
                            SseEvent::Error { error } => {
                                return Err(LlmError::RequestFailed {
                                    provider: "anthropic".into(),
                                    message: error.to_string(),
                                });
                            }
                            SseEvent::MessageStop | SseEvent::MessageStart { .. } | SseEvent::Ping | SseEvent::MessageDelta { usage: None, .. } => {}
                        }
                    }
                }
            }
        }

        let _ = events.send(LlmEvent::Done { usage }).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_messages_extracts_system_prompt() {
        let provider = AnthropicProvider::new();
        let messages = vec![ChatMessage::system("be terse"), ChatMessage::user("hi")];
        let (formatted, system) = provider.format_messages(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(formatted.len(), 1);
    }

    #[test]
    fn test_format_messages_tool_result_shape() {
        let provider = AnthropicProvider::new();
        let messages = vec![ChatMessage::tool_result("call_1", "72F and sunny")];
        let (formatted, _) = provider.format_messages(&messages);
        assert_eq!(formatted[0]["content"][0]["tool_use_id"], "call_1");
    }
}
