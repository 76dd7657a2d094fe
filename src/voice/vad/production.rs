//! Production VAD: two-stage speech detection.
//!
//! Stage 1 (WebRTC/earshot) is a cheap rule-based pre-filter; stage 2
//! (Silero) only runs when stage 1 signals possible speech, confirming
//! with an ML model that rejects background noise. Accumulates confirmed
//! speech into sentence-sized chunks with pre/post-speech padding.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::{VADError, VADResult, VoiceActivityDetection};
use super::silero_raw::SileroRawVAD;
use super::webrtc::WebRtcVAD;

#[derive(Debug, Clone)]
pub struct ProductionVADConfig {
    /// Silero speech-probability threshold.
    pub silero_threshold: f32,
    /// WebRTC aggressiveness (0-3).
    pub webrtc_aggressiveness: u8,
    /// Consecutive silent frames before a sentence is considered complete.
    pub silence_threshold_frames: u32,
    /// Minimum speech frames required before a sentence is accepted.
    pub min_speech_frames: u32,
    /// Audio kept before speech onset, for natural sentence starts.
    pub pre_speech_buffer_ms: u32,
    /// Audio kept after speech offset, to avoid clipping trailing words.
    pub post_speech_buffer_ms: u32,
    /// Whether to confirm WebRTC hits with Silero before accepting them.
    pub use_two_stage: bool,
}

impl Default for ProductionVADConfig {
    fn default() -> Self {
        Self {
            silero_threshold: 0.3,
            webrtc_aggressiveness: 2,
            silence_threshold_frames: 40,
            min_speech_frames: 3,
            pre_speech_buffer_ms: 300,
            post_speech_buffer_ms: 500,
            use_two_stage: true,
        }
    }
}

/// Accumulates audio chunks into one sentence, tracking silence/speech runs.
struct SentenceBuffer {
    chunks: VecDeque<Vec<i16>>,
    last_speech_time: Option<Instant>,
    silence_frames: u32,
    speech_frames: u32,
    config: ProductionVADConfig,
    frame_size: usize,
}

impl SentenceBuffer {
    fn new(config: ProductionVADConfig) -> Self {
        Self { chunks: VecDeque::new(), last_speech_time: None, silence_frames: 0, speech_frames: 0, config, frame_size: 512 }
    }

    fn add_frame(&mut self, samples: &[i16], is_speech: bool) {
        self.chunks.push_back(samples.to_vec());

        if is_speech {
            self.speech_frames += 1;
            self.silence_frames = 0;
            self.last_speech_time = Some(Instant::now());
        } else {
            self.silence_frames += 1;
        }

        let max_chunks = ((self.config.pre_speech_buffer_ms as usize * 16) / self.frame_size).max(1) * 4;
        while self.chunks.len() > max_chunks && self.speech_frames == 0 {
            self.chunks.pop_front();
        }
    }

    fn should_transcribe(&self) -> bool {
        self.speech_frames >= self.config.min_speech_frames && self.silence_frames >= self.config.silence_threshold_frames
    }

    fn get_audio(&self) -> Vec<i16> {
        self.chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.silence_frames = 0;
        self.speech_frames = 0;
        self.last_speech_time = None;
    }
}

/// Two-stage production VAD (§4.A pipeline front-end): WebRTC pre-filter,
/// Silero confirmation, sentence boundary detection.
pub struct ProductionVAD {
    webrtc: WebRtcVAD,
    silero: SileroRawVAD,
    config: ProductionVADConfig,
    buffer: SentenceBuffer,
    initialized: bool,
}

impl ProductionVAD {
    pub fn new() -> Self {
        Self::with_config(ProductionVADConfig::default())
    }

    pub fn with_config(config: ProductionVADConfig) -> Self {
        Self {
            webrtc: WebRtcVAD::with_aggressiveness(config.webrtc_aggressiveness),
            silero: SileroRawVAD::new().with_threshold(config.silero_threshold),
            buffer: SentenceBuffer::new(config.clone()),
            config,
            initialized: false,
        }
    }

    pub fn config(&self) -> &ProductionVADConfig {
        &self.config
    }

    pub async fn initialize(&mut self) -> Result<(), VADError> {
        self.webrtc.initialize().await?;
        // Silero model may not be present on disk; fall back to WebRTC-only
        // detection rather than failing initialization outright.
        if let Err(e) = self.silero.initialize().await {
            tracing::warn!(error = %e, "silero model unavailable, falling back to webrtc-only VAD");
        }
        self.initialized = true;
        Ok(())
    }

    fn is_silero_ready(&self) -> bool {
        self.config.use_two_stage && self.silero.is_initialized()
    }

    /// Feed one frame of audio. Returns the accumulated sentence once a
    /// silence run closes it out.
    pub async fn process_frame(&mut self, audio: &[i16]) -> Result<Option<Vec<i16>>, VADError> {
        if !self.initialized {
            return Err(VADError::ModelNotLoaded("ProductionVAD not initialized".into()));
        }

        let fast_result = self.webrtc.detect(audio).await?;
        let is_speech = if fast_result.is_speech && self.is_silero_ready() {
            let confirm: VADResult = self.silero.detect(audio).await?;
            confirm.is_speech
        } else {
            fast_result.is_speech
        };

        self.buffer.add_frame(audio, is_speech);

        if self.buffer.should_transcribe() {
            let complete_audio = self.buffer.get_audio();
            self.buffer.clear();
            return Ok(Some(complete_audio));
        }

        Ok(None)
    }

    #[allow(dead_code)]
    fn post_speech_hold(&self) -> Duration {
        Duration::from_millis(self.config.post_speech_buffer_ms as u64)
    }
}

impl Default for ProductionVAD {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentence_buffer() {
        let config = ProductionVADConfig { min_speech_frames: 1, silence_threshold_frames: 2, ..Default::default() };
        let mut buffer = SentenceBuffer::new(config);

        buffer.add_frame(&[1, 2, 3], true);
        assert!(!buffer.should_transcribe());

        buffer.add_frame(&[0, 0, 0], false);
        assert!(!buffer.should_transcribe());

        buffer.add_frame(&[0, 0, 0], false);
        assert!(buffer.should_transcribe());

        let audio = buffer.get_audio();
        assert_eq!(audio.len(), 9);
    }

    #[tokio::test]
    async fn test_production_vad_config() {
        let vad = ProductionVAD::new();
        assert!(vad.config().use_two_stage);
        assert_eq!(vad.config().webrtc_aggressiveness, 2);
    }
}
