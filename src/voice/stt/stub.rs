//! Stub STT Adapter
//!
//! Returns pre-configured test transcriptions for development/testing. No
//! actual speech recognition — just dummy text based on audio length.

use super::{STTError, SpeechToText, TranscriptResult, TranscriptSegment};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stub adapter requires at least this much audio before it will transcribe.
const STUB_MIN_AUDIO_MS: i64 = 500;
const STUB_CONFIDENCE: f32 = 0.95;
const STUB_DEFAULT_LANGUAGE: &str = "en";

/// Returns dummy transcriptions for testing without requiring an actual
/// Whisper model. Useful for exercising the pipeline without model files.
pub struct StubSTT {
    initialized: AtomicBool,
}

impl StubSTT {
    pub fn new() -> Self {
        Self { initialized: AtomicBool::new(false) }
    }

    fn generate_dummy_text(&self, duration_ms: i64) -> String {
        match duration_ms {
            0..=999 => "Test.".to_string(),
            1000..=1999 => "Test audio transcription.".to_string(),
            2000..=2999 => "This is a test audio transcription from the stub adapter.".to_string(),
            _ => format!("This is a test transcription for audio duration of {duration_ms} milliseconds."),
        }
    }
}

#[async_trait]
impl SpeechToText for StubSTT {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn description(&self) -> &'static str {
        "Stub STT adapter for testing (returns dummy text)"
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    async fn initialize(&self) -> Result<(), STTError> {
        tracing::info!("StubSTT: initializing (no-op)");
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn transcribe(&self, samples: Vec<f32>, language: Option<&str>) -> Result<TranscriptResult, STTError> {
        if !self.is_initialized() {
            return Err(STTError::ModelNotLoaded("stub STT not initialized".to_string()));
        }

        let duration_ms = (samples.len() as i64 * 1000) / 16000;
        if duration_ms < STUB_MIN_AUDIO_MS {
            return Err(STTError::InvalidAudio(format!("audio too short: {duration_ms}ms < {STUB_MIN_AUDIO_MS}ms minimum")));
        }

        let text = self.generate_dummy_text(duration_ms);
        let lang = language.unwrap_or(STUB_DEFAULT_LANGUAGE).to_string();

        Ok(TranscriptResult {
            text: text.clone(),
            language: lang,
            confidence: STUB_CONFIDENCE,
            segments: vec![TranscriptSegment { text, start_ms: 0, end_ms: duration_ms }],
        })
    }

    fn supported_languages(&self) -> Vec<&'static str> {
        vec!["en", "es", "fr", "de", "ja", "zh"]
    }

    fn get_param(&self, name: &str) -> Option<String> {
        match name {
            "min_audio_ms" => Some(STUB_MIN_AUDIO_MS.to_string()),
            "confidence" => Some(STUB_CONFIDENCE.to_string()),
            _ => None,
        }
    }

    fn set_param(&self, _name: &str, _value: &str) -> Result<(), STTError> {
        Ok(())
    }
}

impl Default for StubSTT {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_requires_initialization() {
        let stub = StubSTT::new();
        let result = stub.transcribe(vec![0.0; 16000], None).await;
        assert!(matches!(result, Err(STTError::ModelNotLoaded(_))));
    }

    #[tokio::test]
    async fn test_stub_rejects_short_audio() {
        let stub = StubSTT::new();
        stub.initialize().await.unwrap();
        let result = stub.transcribe(vec![0.0; 1000], None).await;
        assert!(matches!(result, Err(STTError::InvalidAudio(_))));
    }

    #[tokio::test]
    async fn test_stub_transcribes_long_enough_audio() {
        let stub = StubSTT::new();
        stub.initialize().await.unwrap();
        let result = stub.transcribe(vec![0.0; 16000], Some("en")).await.unwrap();
        assert_eq!(result.language, "en");
        assert_eq!(result.confidence, STUB_CONFIDENCE);
    }
}
