//! Pipeline Orchestrator (§4.E): the STT → LLM → TTS dataflow for one
//! utterance, including the pre-speech text ordering protocol, the tool-call
//! loop, interruption/truncation handling, and thinking-indicator timing.
//! Consumes the STT/TTS service layer (`voice::stt_service`,
//! `voice::tts_service`) the same way the teacher's IPC handlers do, but
//! calls them directly — there is no separate IPC boundary in this crate, so
//! the orchestrator task plays that role itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio_constants::ROOM_SAMPLE_RATE;
use crate::config::ConfigHandle;
use crate::data_channel::{DataMessage, DataMessagePayload, SequenceCounter};
use crate::llm::{ChatMessage, GenerateOptions, LlmError, LlmEvent, LlmRegistry};
use crate::session::SessionStore;
use crate::tools::{ToolDispatcher, ToolProgress};
use crate::voice::stt::STTError;
use crate::voice::stt_service;
use crate::voice::tts::TTSError;
use crate::voice::tts_service;
use crate::voice::types::Turn;

/// Delay after which, if the LLM has not yet produced its first text delta,
/// a `thinking` indicator is shown (§4.E).
pub const THINKING_INDICATOR_DELAY: Duration = Duration::from_millis(400);
/// Upper bound on how long the pipeline waits for a client `text_displayed`
/// ack before synthesizing audio anyway (§4.B, §5).
pub const PRE_SPEECH_ACK_BOUND: Duration = Duration::from_millis(500);
/// Preferred (non-blocking) wait before proceeding to audio synthesis once
/// `pre_speech_text` has been sent (§4.E).
pub const PRE_SPEECH_MIN_WAIT: Duration = Duration::from_millis(120);

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stt(#[from] STTError),
    #[error(transparent)]
    Tts(#[from] TTSError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("response cancelled")]
    Cancelled,
}

/// Reported back by `voice::room`'s audio-forwarding task once it has
/// finished handing a synthesis result to the transport (in full, or cut
/// short by a barge-in) — lets `speak` compute `audio_end_ms` for
/// sample-accurate truncation (§4.D).
pub struct PlaybackOutcome {
    pub samples_delivered: usize,
}

/// Audio ready for the Room Session Manager to publish, already at
/// provider-native rate; `voice::room` resamples to `ROOM_SAMPLE_RATE`
/// before publishing (§4.A). `ack` is how the publisher reports how much of
/// the clip actually reached the transport.
pub struct SynthesizedAudio {
    pub response_id: Uuid,
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub ack: oneshot::Sender<PlaybackOutcome>,
}

pub struct PipelineDeps {
    pub session_store: Arc<SessionStore>,
    pub llm_registry: Arc<LlmRegistry>,
    pub tool_dispatcher: Arc<ToolDispatcher>,
    pub config: ConfigHandle,
}

struct SpeakOutcome {
    text: String,
    interrupted: bool,
}

/// Drives one participant's STT→LLM→TTS pipeline. One instance per
/// participant orchestrator task (§5).
pub struct Pipeline {
    session_id: Uuid,
    room_id: Uuid,
    deps: Arc<PipelineDeps>,
    data_tx: mpsc::Sender<DataMessage>,
    audio_tx: mpsc::Sender<SynthesizedAudio>,
    /// Inbound `text_displayed` acks from the client, keyed by `speech_id`
    /// (§4.E step 5c, §6).
    ack_rx: mpsc::Receiver<Uuid>,
    /// The `response_id` currently being spoken, if any, so the Room Session
    /// Manager can tag the right response as interrupted on barge-in (§4.D).
    current_response: Arc<Mutex<Option<Uuid>>>,
    sequence: SequenceCounter,
    /// Separate monotonic counter for `pre_speech_text.sequence` (§4.E: "a
    /// monotonic counter per participant", distinct from the envelope
    /// sequence on `DataMessage`).
    pre_speech_sequence: SequenceCounter,
    cancel: CancellationToken,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: Uuid,
        room_id: Uuid,
        deps: Arc<PipelineDeps>,
        data_tx: mpsc::Sender<DataMessage>,
        audio_tx: mpsc::Sender<SynthesizedAudio>,
        ack_rx: mpsc::Receiver<Uuid>,
        current_response: Arc<Mutex<Option<Uuid>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            room_id,
            deps,
            data_tx,
            audio_tx,
            ack_rx,
            current_response,
            sequence: SequenceCounter::default(),
            pre_speech_sequence: SequenceCounter::default(),
            cancel,
        }
    }

    /// Swap in a fresh cancellation token for the next turn. A barge-in
    /// (`turn::TurnAction::Interrupt`) consumes the previous token
    /// permanently, so the Room Session Manager calls this before starting
    /// the next turn on a long-lived Pipeline instance (§4.D, §4.H).
    pub fn reset_cancel(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    async fn send(&mut self, payload: DataMessagePayload) {
        let message = DataMessage::new(self.sequence.next(), payload);
        let _ = self.data_tx.send(message).await;
    }

    /// Step 1: transcribe raw speech samples into a final transcript,
    /// appending a user Turn on success.
    pub async fn transcribe_final(&mut self, samples: &[i16], language: Option<&str>) -> Result<String, PipelineError> {
        let result = stt_service::transcribe_speech_async(samples, language).await?;
        self.send(DataMessagePayload::Transcription {
            speaker: crate::data_channel::Speaker::User,
            text: result.text.clone(),
        })
        .await;

        let store = Arc::clone(&self.deps.session_store);
        let (session_id, room_id, text) = (self.session_id, self.room_id, result.text.clone());
        store
            .update(session_id, room_id, |state| {
                let turn_id = state.turns.len() as u64;
                state.turns.push(Turn::new_user(turn_id, text));
                state.context.turn_count += 1;
            })
            .await;

        Ok(result.text)
    }

    /// Steps 2-7: run the LLM with the tool-call loop until a final textual
    /// response is produced, then synthesize and publish its audio,
    /// honoring the pre-speech text ordering protocol (§4.E). A barge-in at
    /// any point marks the resulting Turn `interrupted` and returns
    /// `PipelineError::Cancelled`.
    pub async fn run_turn(&mut self, history: &[ChatMessage]) -> Result<(), PipelineError> {
        let response_id = Uuid::new_v4();
        let mut messages = history.to_vec();

        loop {
            let (events_tx, mut events_rx) = mpsc::channel(32);
            let provider = self
                .deps
                .llm_registry
                .select(None, None)
                .ok_or(LlmError::NoProvider(None))?;

            let tools = self.deps.tool_dispatcher.specs();
            let options = GenerateOptions::default();

            let generate_cancel = self.cancel.clone();
            let generate_messages = messages.clone();
            let generate = provider.generate(&generate_messages, &tools, &options, events_tx, generate_cancel);

            let mut text = String::new();
            let mut tool_calls = Vec::new();
            let mut first_delta_seen = false;
            let mut thinking_sent = false;
            let mut interrupted_during_generation = false;

            tokio::pin!(generate);
            let mut thinking_timer = Box::pin(tokio::time::sleep(THINKING_INDICATOR_DELAY));

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        interrupted_during_generation = true;
                        break;
                    }
                    _ = &mut thinking_timer, if !first_delta_seen && !thinking_sent => {
                        thinking_sent = true;
                        self.send(DataMessagePayload::Thinking { id: response_id, text: "Thinking…".to_string() }).await;
                    }
                    event = events_rx.recv() => {
                        match event {
                            Some(LlmEvent::TextDelta(delta)) => {
                                first_delta_seen = true;
                                text.push_str(&delta);
                            }
                            Some(LlmEvent::ToolCall(call)) => {
                                tool_calls.push(call);
                            }
                            Some(LlmEvent::Done { .. }) | None => break,
                        }
                    }
                    result = &mut generate => {
                        result?;
                    }
                }
            }

            if thinking_sent {
                self.send(DataMessagePayload::HideThinking { id: response_id }).await;
            }

            if interrupted_during_generation {
                self.finish_turn(response_id, text, true).await;
                return Err(PipelineError::Cancelled);
            }

            if tool_calls.is_empty() {
                let outcome = self.speak(response_id, text).await;
                let interrupted = outcome.interrupted;
                self.finish_turn(response_id, outcome.text, interrupted).await;
                return if interrupted { Err(PipelineError::Cancelled) } else { Ok(()) };
            }

            messages.push(ChatMessage::assistant(text));
            for call_request in tool_calls {
                let mut call = crate::voice::types::ToolCall::new(call_request.name, call_request.arguments);
                call.call_id = uuid::Uuid::parse_str(&call_request.call_id).unwrap_or(call.call_id);

                let (progress_tx, mut progress_rx) = mpsc::channel::<ToolProgress>(8);
                let dispatcher = Arc::clone(&self.deps.tool_dispatcher);

                let progress_forward = async {
                    while let Some(progress) = progress_rx.recv().await {
                        self.send(DataMessagePayload::Transcription {
                            speaker: crate::data_channel::Speaker::System,
                            text: progress.message,
                        })
                        .await;
                    }
                };

                let dispatch = dispatcher.dispatch(&mut call, progress_tx);
                tokio::pin!(dispatch);
                tokio::select! {
                    () = progress_forward => {}
                    result = &mut dispatch => {
                        let content = match result {
                            Ok(value) => value.to_string(),
                            Err(e) => serde_json::json!({"error": e.to_string()}).to_string(),
                        };
                        messages.push(ChatMessage::tool_result(call.call_id.to_string(), content));
                    }
                }
            }
        }
    }

    /// Push the completed (or interrupted) assistant Turn to the Session
    /// State Store and emit the matching `transcription{assistant}` data
    /// message (§4.E step 6, scenario 1). `text` is already truncated to
    /// what was actually spoken when `interrupted` is true.
    async fn finish_turn(&mut self, response_id: Uuid, text: String, interrupted: bool) {
        self.send(DataMessagePayload::Transcription { speaker: crate::data_channel::Speaker::Assistant, text: text.clone() })
            .await;

        let store = Arc::clone(&self.deps.session_store);
        let (session_id, room_id) = (self.session_id, self.room_id);
        store
            .update(session_id, room_id, |state| {
                let turn_id = state.turns.len() as u64;
                let mut turn = Turn::new_assistant(turn_id, response_id);
                turn.complete(text, interrupted);
                state.turns.push(turn);
            })
            .await;
    }

    /// Wait until a `text_displayed` ack tagged with `response_id` arrives,
    /// ignoring stale acks for earlier turns.
    async fn wait_for_ack(&mut self, response_id: Uuid) {
        while let Some(acked_id) = self.ack_rx.recv().await {
            if acked_id == response_id {
                return;
            }
        }
    }

    async fn speak(&mut self, response_id: Uuid, text: String) -> SpeakOutcome {
        *self.current_response.lock().await = Some(response_id);

        let sequence = self.pre_speech_sequence.next();
        self.send(DataMessagePayload::PreSpeechText { speech_id: response_id, sequence, text: text.clone() }).await;
        self.send(DataMessagePayload::SpeechStarting { speech_id: response_id }).await;

        tokio::select! {
            _ = self.cancel.cancelled() => {
                *self.current_response.lock().await = None;
                return SpeakOutcome { text: String::new(), interrupted: true };
            }
            _ = tokio::time::sleep(PRE_SPEECH_MIN_WAIT) => {}
            _ = tokio::time::timeout(PRE_SPEECH_ACK_BOUND, self.wait_for_ack(response_id)) => {}
        }

        let synthesis = tokio::select! {
            _ = self.cancel.cancelled() => {
                *self.current_response.lock().await = None;
                return SpeakOutcome { text: String::new(), interrupted: true };
            }
            result = tts_service::synthesize_speech_async(&text, None, None) => result,
        };

        let synthesis = match synthesis {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(response_id = %response_id, error = %e, "tts synthesis failed");
                *self.current_response.lock().await = None;
                return SpeakOutcome { text, interrupted: false };
            }
        };

        let total_samples = synthesis.samples.len();
        let total_duration_ms = synthesis.duration_ms;
        let sample_rate = synthesis.sample_rate;

        let (ack_tx, ack_rx) = oneshot::channel();
        let sent = self
            .audio_tx
            .send(SynthesizedAudio { response_id, samples: synthesis.samples, sample_rate, ack: ack_tx })
            .await
            .is_ok();

        *self.current_response.lock().await = None;

        if !sent {
            return SpeakOutcome { text, interrupted: false };
        }

        match ack_rx.await {
            Ok(playback) if playback.samples_delivered < samples_to_room_rate(total_samples, sample_rate) => {
                let audio_end_ms = (playback.samples_delivered as u64 * 1000) / ROOM_SAMPLE_RATE as u64;
                let truncated = truncate_text_by_audio_fraction(&text, audio_end_ms, total_duration_ms);
                SpeakOutcome { text: truncated, interrupted: true }
            }
            Ok(_) => SpeakOutcome { text, interrupted: false },
            Err(_) => SpeakOutcome { text, interrupted: false },
        }
    }
}

/// How many `ROOM_SAMPLE_RATE` samples a clip of `samples` at `sample_rate`
/// becomes once resampled for transport, for comparison against
/// `PlaybackOutcome::samples_delivered`.
fn samples_to_room_rate(samples: usize, sample_rate: u32) -> usize {
    if sample_rate == 0 {
        return samples;
    }
    ((samples as u64) * ROOM_SAMPLE_RATE as u64 / sample_rate as u64) as usize
}

/// Keep only the prefix of `text` proportional to how much of the clip's
/// total duration was actually delivered before a barge-in cut it off
/// (§4.D steps 4-5).
fn truncate_text_by_audio_fraction(text: &str, audio_end_ms: u64, total_duration_ms: u64) -> String {
    if total_duration_ms == 0 || audio_end_ms >= total_duration_ms {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let fraction = audio_end_ms as f64 / total_duration_ms as f64;
    let cutoff = ((chars.len() as f64) * fraction).round() as usize;
    chars.into_iter().take(cutoff).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thinking_delay_is_under_pre_speech_bound() {
        assert!(THINKING_INDICATOR_DELAY < PRE_SPEECH_ACK_BOUND);
    }

    #[test]
    fn test_pre_speech_min_wait_never_exceeds_bound() {
        assert!(PRE_SPEECH_MIN_WAIT <= PRE_SPEECH_ACK_BOUND);
    }

    #[test]
    fn test_truncate_text_by_audio_fraction_half() {
        let text = "abcdefghij";
        let truncated = truncate_text_by_audio_fraction(text, 500, 1000);
        assert_eq!(truncated, "abcde");
    }

    #[test]
    fn test_truncate_text_by_audio_fraction_full_duration_is_noop() {
        let text = "hello world";
        assert_eq!(truncate_text_by_audio_fraction(text, 1000, 1000), text);
    }

    #[test]
    fn test_truncate_text_by_audio_fraction_zero_duration_is_noop() {
        let text = "hello world";
        assert_eq!(truncate_text_by_audio_fraction(text, 0, 0), text);
    }

    #[test]
    fn test_samples_to_room_rate_same_rate_is_identity() {
        assert_eq!(samples_to_room_rate(480, ROOM_SAMPLE_RATE), 480);
    }

    #[test]
    fn test_samples_to_room_rate_upsamples() {
        assert_eq!(samples_to_room_rate(16000, 16000), ROOM_SAMPLE_RATE as usize);
    }
}
