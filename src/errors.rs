//! Crate-wide error taxonomy (§7).
//!
//! Each module owns a narrow `thiserror` error enum for its own concern
//! (`voice::stt::STTError`, `voice::tts::TTSError`, `voice::vad::VADError`,
//! `llm::LlmError`, `tools::ToolError`, `session::SessionError`,
//! `data_channel::DataChannelError`). `AerovoxError` is the wrapper used at
//! call sites that cross those boundaries — principally the pipeline
//! orchestrator, which must react uniformly to failure from any stage.

use thiserror::Error;

/// The §7 error taxonomy, attached to every `AerovoxError` so recovery logic
/// can match on class without losing the concrete diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Room connect/publish/subscribe failure.
    Transport,
    /// STT/LLM/TTS RPC failure.
    Provider,
    /// Tool dispatch failure, normally recoverable by the LLM producing an
    /// apology turn.
    Tool,
    /// Malformed data-channel message.
    Protocol,
    /// Invalid language/environment value, coerced to nearest valid.
    Policy,
    /// Bounded queue full.
    Capacity,
}

#[derive(Debug, Error)]
pub enum AerovoxError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Stt(#[from] crate::voice::stt::STTError),

    #[error(transparent)]
    Tts(#[from] crate::voice::tts::TTSError),

    #[error(transparent)]
    Vad(#[from] crate::voice::vad::VADError),

    #[error(transparent)]
    Llm(#[from] crate::llm::LlmError),

    #[error(transparent)]
    Tool(#[from] crate::tools::ToolError),

    #[error(transparent)]
    Session(#[from] crate::session::SessionError),

    #[error(transparent)]
    DataChannel(#[from] crate::data_channel::DataChannelError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("policy error: {0}")]
    Policy(String),

    #[error("capacity error: {0}")]
    Capacity(String),
}

impl AerovoxError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(_) => ErrorClass::Transport,
            Self::Provider(_) | Self::Stt(_) | Self::Tts(_) | Self::Vad(_) | Self::Llm(_) => {
                ErrorClass::Provider
            }
            Self::Tool(_) => ErrorClass::Tool,
            Self::Protocol(_) | Self::DataChannel(_) => ErrorClass::Protocol,
            Self::Policy(_) => ErrorClass::Policy,
            Self::Capacity(_) => ErrorClass::Capacity,
            Self::Session(_) => ErrorClass::Transport,
        }
    }

    /// Whether this error should be retried with backoff (§7 "Transient
    /// provider errors: exponential backoff up to 3 attempts per call").
    pub fn retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transport | ErrorClass::Provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_errors_are_retryable() {
        let err = AerovoxError::Provider("timeout".into());
        assert!(err.retryable());
        assert_eq!(err.class(), ErrorClass::Provider);
    }

    #[test]
    fn test_protocol_errors_are_not_retryable() {
        let err = AerovoxError::Protocol("unknown type".into());
        assert!(!err.retryable());
        assert_eq!(err.class(), ErrorClass::Protocol);
    }
}
