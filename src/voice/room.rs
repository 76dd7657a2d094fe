//! Room Session Manager (§4.H): one `RoomSession` per call, bridging LiveKit
//! room events onto the STT→LLM→TTS `Pipeline` and the `TurnController`.
//!
//! Connects, publishes and handles events directly rather than splitting
//! AI-persona-agent and call-wide STT-listener-agent roles across two
//! actors: `pipeline::Pipeline` already unifies STT, LLM and TTS for one
//! participant, so there's no separate transcription-routing hop and no
//! event-indirection layer needed. Video/avatar publishing and ambient
//! audio tracks have no counterpart here and are not carried over.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use livekit::prelude::*;
use livekit::options::TrackPublishOptions;
use livekit::webrtc::audio_frame::AudioFrame;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_source::{AudioSourceOptions, RtcAudioSource};
use livekit::webrtc::audio_stream::native::NativeAudioStream;
use livekit_api::access_token::{AccessToken, VideoGrants};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audio_constants::{AUDIO_SAMPLE_RATE, ROOM_SAMPLE_RATE};
use crate::data_channel::{DataMessage, DataMessagePayload};
use crate::llm::ChatMessage;
use crate::pipeline::{Pipeline, PipelineDeps, PipelineError, PlaybackOutcome, SynthesizedAudio};
use crate::turn::TurnAction;
use crate::utils::audio::{f32_to_i16, i16_to_f32, resample};
use crate::voice::types::{Turn, TurnRole};
use crate::voice::vad::{ProductionVAD, VoiceActivityDetection, WebRtcVAD};

/// Samples accumulated before feeding the VAD: LiveKit delivers 10ms/160
/// sample frames at 16kHz, but earshot's WebRTC VAD needs >=240-sample
/// chunks (§4.A).
const VAD_FRAME_SIZE: usize = 480;
/// Audio samples per 10ms at the room's transport rate, for outbound frames.
const ROOM_SAMPLES_PER_10MS: usize = (ROOM_SAMPLE_RATE / 100) as usize;
/// Data-channel topic used for the `DataMessage` envelope (§4.B).
const DATA_TOPIC: &str = "aerovox";

/// LiveKit participant role, carried in JWT metadata (§4.H). Only used here
/// to skip the bot's own published track when it echoes back through
/// `TrackSubscribed` for other listeners in the room.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Human,
    Assistant,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParticipantMetadata {
    pub role: ParticipantRole,
}

impl ParticipantMetadata {
    pub fn new(role: ParticipantRole) -> Self {
        Self { role }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("failed to generate room token: {0}")]
    Token(String),
    #[error("failed to connect to room: {0}")]
    Connect(String),
    #[error("failed to publish audio track: {0}")]
    Publish(String),
}

fn build_history(turns: &[Turn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .map(|turn| match turn.role {
            TurnRole::User => ChatMessage::user(turn.text.clone()),
            TurnRole::Assistant => ChatMessage::assistant(turn.text.clone()),
            TurnRole::System => ChatMessage::system(turn.text.clone()),
        })
        .collect()
}

/// Deterministic per-room UUID so reconnects (same LiveKit room name) map
/// back onto the same `SessionStore` entries rather than orphaning state.
fn room_uuid(room_name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, room_name.as_bytes())
}

/// Deterministic per-(room, participant) session id.
fn session_uuid(room_name: &str, identity: &str) -> Uuid {
    Uuid::new_v5(&room_uuid(room_name), identity.as_bytes())
}

/// Publish `samples` (resampled to `ROOM_SAMPLE_RATE` if needed) to the
/// transport 10ms-frame at a time, stopping early if `response_id` appears
/// in `interrupted_responses` (§4.D step 3, §8). Returns the number of
/// `ROOM_SAMPLE_RATE` samples actually handed to the transport, for
/// sample-accurate truncation (§4.D steps 4-5).
async fn publish_bot_audio(
    source: &NativeAudioSource,
    response_id: Uuid,
    samples: &[i16],
    sample_rate: u32,
    gain: f32,
    interrupted_responses: &Arc<Mutex<HashSet<Uuid>>>,
) -> Result<usize, String> {
    let mut samples = samples.to_vec();
    if sample_rate != ROOM_SAMPLE_RATE {
        let as_f32 = i16_to_f32(&samples);
        let resampled = resample(&as_f32, sample_rate, ROOM_SAMPLE_RATE);
        samples = f32_to_i16(&resampled);
    }
    if gain < 1.0 {
        for sample in samples.iter_mut() {
            *sample = (*sample as f32 * gain) as i16;
        }
    }

    let mut delivered = 0usize;
    for chunk in samples.chunks(ROOM_SAMPLES_PER_10MS) {
        if interrupted_responses.lock().await.remove(&response_id) {
            break;
        }
        let frame = AudioFrame {
            data: std::borrow::Cow::Borrowed(chunk),
            sample_rate: ROOM_SAMPLE_RATE,
            num_channels: 1,
            samples_per_channel: chunk.len() as u32,
        };
        source.capture_frame(&frame).await.map_err(|e| e.to_string())?;
        delivered += chunk.len();
    }
    Ok(delivered)
}

async fn forward_data_message(room: &Room, message: &DataMessage) {
    let payload = match serde_json::to_vec(message) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to serialize data message");
            return;
        }
    };
    if let Err(e) = room
        .local_participant()
        .publish_data(DataPacket { payload: payload.into(), topic: Some(DATA_TOPIC.to_string()), reliable: true, ..Default::default() })
        .await
    {
        warn!(error = %e, "failed to publish data message");
    }
}

/// One live call: one bot audio track published to the room, one
/// STT→LLM→TTS orchestrator task per human participant (§4.H).
pub struct RoomSession {
    room: Arc<Room>,
    room_name: String,
    bot_audio: NativeAudioSource,
    deps: Arc<PipelineDeps>,
    participants: Mutex<HashMap<String, CancellationToken>>,
    /// Routes inbound `text_displayed` acks (§4.E step 5c) to the pipeline
    /// task currently waiting on them, keyed by participant identity.
    ack_senders: Mutex<HashMap<String, mpsc::Sender<Uuid>>>,
}

impl RoomSession {
    /// Connect to a LiveKit room as the assistant participant, publish the
    /// bot's audio track, and start handling room events. `deps` is shared
    /// across every participant orchestrator task spawned for this call.
    pub async fn connect(room_name: &str, deps: Arc<PipelineDeps>) -> Result<Arc<Self>, RoomError> {
        let config = deps.config.snapshot();

        let metadata = ParticipantMetadata::new(ParticipantRole::Assistant);
        let token = AccessToken::with_api_key(&config.room_api_key, &config.room_api_secret)
            .with_identity("assistant")
            .with_name("Assistant")
            .with_metadata(&metadata.to_json())
            .with_grants(VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .to_jwt()
            .map_err(|e| RoomError::Token(e.to_string()))?;

        let (room, room_events) = Room::connect(&config.room_url, &token, RoomOptions::default())
            .await
            .map_err(|e| RoomError::Connect(e.to_string()))?;

        info!(room = room_name, "room session connected");

        let bot_audio = NativeAudioSource::new(AudioSourceOptions::default(), ROOM_SAMPLE_RATE, 1, 1000);
        let audio_track = LocalAudioTrack::create_audio_track("assistant-voice", RtcAudioSource::Native(bot_audio.clone()));
        room.local_participant()
            .publish_track(LocalTrack::Audio(audio_track), TrackPublishOptions { source: TrackSource::Microphone, ..Default::default() })
            .await
            .map_err(|e| RoomError::Publish(e.to_string()))?;

        let session = Arc::new(Self {
            room: Arc::new(room),
            room_name: room_name.to_string(),
            bot_audio,
            deps,
            participants: Mutex::new(HashMap::new()),
            ack_senders: Mutex::new(HashMap::new()),
        });

        let handler = Arc::clone(&session);
        tokio::spawn(async move { handler.run_event_loop(room_events).await });

        Ok(session)
    }

    async fn run_event_loop(self: Arc<Self>, mut room_events: mpsc::UnboundedReceiver<RoomEvent>) {
        while let Some(event) = room_events.recv().await {
            match event {
                RoomEvent::TrackSubscribed { track, publication: _, participant } => {
                    let meta = ParticipantMetadata::from_json(&participant.metadata());
                    let is_human = meta.as_ref().map(|m| m.role == ParticipantRole::Human).unwrap_or(true);
                    if !is_human {
                        continue;
                    }
                    if let RemoteTrack::Audio(audio_track) = track {
                        let identity = participant.identity().to_string();
                        info!(participant = %identity, "subscribed to human audio track");
                        let session = Arc::clone(&self);
                        tokio::spawn(async move { session.run_participant(identity, audio_track).await });
                    }
                }
                RoomEvent::ParticipantConnected(participant) => {
                    info!(participant = %participant.identity(), "participant joined");
                }
                RoomEvent::ParticipantDisconnected(participant) => {
                    let identity = participant.identity().to_string();
                    info!(participant = %identity, "participant left, cancelling orchestrator task");
                    // Session state is intentionally preserved (no SessionStore::evict)
                    // so a reconnecting participant resumes their conversation (§4.H).
                    if let Some(cancel) = self.participants.lock().await.remove(&identity) {
                        cancel.cancel();
                    }
                }
                RoomEvent::DataReceived { payload, participant, .. } => {
                    let Some(participant) = participant else { continue };
                    let identity = participant.identity().to_string();
                    self.handle_inbound_data(&identity, &payload).await;
                }
                RoomEvent::Disconnected { reason } => {
                    info!(room = %self.room_name, ?reason, "room session disconnected");
                    break;
                }
                _ => {}
            }
        }
    }

    /// Route an inbound `text_displayed` ack (§6) to the pipeline task
    /// waiting on it. Every other inbound payload is ignored: per §6 the
    /// rest of the catalog is server -> client only.
    async fn handle_inbound_data(&self, identity: &str, payload: &[u8]) {
        let message: DataMessage = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to parse inbound data message");
                return;
            }
        };
        if let DataMessagePayload::TextDisplayed { speech_id } = message.payload {
            if let Some(sender) = self.ack_senders.lock().await.get(identity) {
                let _ = sender.try_send(speech_id);
            }
        }
    }

    /// Drives one human participant's audio: fast VAD for barge-in
    /// detection, `ProductionVAD` for sentence-boundary STT triggering, and
    /// the `Pipeline`/`TurnController` machinery in between (§4.H).
    async fn run_participant(self: Arc<Self>, identity: String, audio_track: RemoteAudioTrack) {
        let task_cancel = CancellationToken::new();
        self.participants.lock().await.insert(identity.clone(), task_cancel.clone());

        let session_id = session_uuid(&self.room_name, &identity);
        let room_id = room_uuid(&self.room_name);

        let mut sentence_vad = ProductionVAD::new();
        if let Err(e) = sentence_vad.initialize().await {
            error!(participant = %identity, error = %e, "failed to initialize vad");
            self.participants.lock().await.remove(&identity);
            return;
        }
        let interrupt_vad = WebRtcVAD::new();
        if let Err(e) = interrupt_vad.initialize().await {
            error!(participant = %identity, error = %e, "failed to initialize interrupt vad");
        }

        let (data_tx, mut data_rx) = mpsc::channel::<DataMessage>(64);
        let (audio_tx, mut audio_rx) = mpsc::channel::<SynthesizedAudio>(8);
        let (ack_tx, ack_rx) = mpsc::channel::<Uuid>(8);
        self.ack_senders.lock().await.insert(identity.clone(), ack_tx);

        let turn_cancel = CancellationToken::new();
        let current_response: Arc<Mutex<Option<Uuid>>> = Arc::new(Mutex::new(None));
        let interrupted_responses: Arc<Mutex<HashSet<Uuid>>> = Arc::new(Mutex::new(HashSet::new()));

        let pipeline = Arc::new(Mutex::new(Pipeline::new(
            session_id,
            room_id,
            Arc::clone(&self.deps),
            data_tx,
            audio_tx,
            ack_rx,
            Arc::clone(&current_response),
            turn_cancel.clone(),
        )));
        let current_cancel = Arc::new(Mutex::new(turn_cancel));
        let gain = Arc::new(Mutex::new(1.0f32));

        let room_for_data = Arc::clone(&self.room);
        let data_forward = tokio::spawn(async move {
            while let Some(message) = data_rx.recv().await {
                forward_data_message(&room_for_data, &message).await;
            }
        });

        let bot_audio = self.bot_audio.clone();
        let gain_for_audio = Arc::clone(&gain);
        let interrupted_for_audio = Arc::clone(&interrupted_responses);
        let audio_forward = tokio::spawn(async move {
            while let Some(synth) = audio_rx.recv().await {
                let g = *gain_for_audio.lock().await;
                let already_interrupted = interrupted_for_audio.lock().await.remove(&synth.response_id);
                let samples_delivered = if already_interrupted {
                    0
                } else {
                    match publish_bot_audio(&bot_audio, synth.response_id, &synth.samples, synth.sample_rate, g, &interrupted_for_audio).await {
                        Ok(delivered) => delivered,
                        Err(e) => {
                            warn!(error = %e, "failed to publish synthesized audio");
                            0
                        }
                    }
                };
                let _ = synth.ack.send(PlaybackOutcome { samples_delivered });
            }
        });

        let mut audio_stream = NativeAudioStream::new(audio_track.rtc_track(), AUDIO_SAMPLE_RATE as i32, 1);
        let mut accum: Vec<i16> = Vec::with_capacity(VAD_FRAME_SIZE);
        let mut speaking = false;
        let mut silence_run: u32 = 0;

        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => break,
                frame = audio_stream.next() => {
                    let Some(frame) = frame else { break };
                    accum.extend_from_slice(frame.data.as_ref());

                    while accum.len() >= VAD_FRAME_SIZE {
                        let chunk: Vec<i16> = accum.drain(..VAD_FRAME_SIZE).collect();

                        if let Ok(result) = interrupt_vad.detect(&chunk).await {
                            if result.is_speech {
                                silence_run = 0;
                                if !speaking {
                                    speaking = true;
                                    let action = self
                                        .deps
                                        .session_store
                                        .update(session_id, room_id, |state| state.turn_controller.on_speech_start())
                                        .await;
                                    self.apply_turn_action(action, &current_cancel, &gain, &current_response, &interrupted_responses).await;
                                }
                            } else {
                                silence_run += 1;
                                if speaking && silence_run >= interrupt_vad.silence_threshold_frames() {
                                    speaking = false;
                                    let action = self
                                        .deps
                                        .session_store
                                        .update(session_id, room_id, |state| state.turn_controller.on_speech_end())
                                        .await;
                                    self.apply_turn_action(action, &current_cancel, &gain, &current_response, &interrupted_responses).await;
                                }
                            }
                        }

                        match sentence_vad.process_frame(&chunk).await {
                            Ok(Some(samples)) => {
                                let pipeline = Arc::clone(&pipeline);
                                let current_cancel = Arc::clone(&current_cancel);
                                let store = Arc::clone(&self.deps.session_store);
                                tokio::spawn(async move {
                                    handle_utterance(pipeline, current_cancel, store, session_id, room_id, samples).await;
                                });
                            }
                            Ok(None) => {}
                            Err(e) => warn!(participant = %identity, error = %e, "vad error"),
                        }
                    }
                }
            }
        }

        self.shutdown_participant(&identity, session_id, room_id, pipeline, data_forward, audio_forward).await;
    }

    async fn apply_turn_action(
        &self,
        action: TurnAction,
        current_cancel: &Arc<Mutex<CancellationToken>>,
        gain: &Arc<Mutex<f32>>,
        current_response: &Arc<Mutex<Option<Uuid>>>,
        interrupted_responses: &Arc<Mutex<HashSet<Uuid>>>,
    ) {
        match action {
            TurnAction::None => {}
            TurnAction::DuckAssistant => {
                *gain.lock().await = crate::turn::DUCK_GAIN;
            }
            TurnAction::ReleaseDuck => {
                *gain.lock().await = 1.0;
            }
            TurnAction::Interrupt => {
                current_cancel.lock().await.cancel();
                *gain.lock().await = 1.0;
                // Drop any audio already queued or mid-flight for the
                // response that just got barged in on (§4.D step 3, §8).
                if let Some(response_id) = *current_response.lock().await {
                    interrupted_responses.lock().await.insert(response_id);
                }
            }
        }
    }

    /// Graceful shutdown for one participant task (§4.H): drain any in-flight
    /// tool call bounded at 2s by simply waiting for the current turn's
    /// pipeline lock, then let the forwarding tasks drain and exit once the
    /// pipeline's senders are dropped.
    async fn shutdown_participant(
        &self,
        identity: &str,
        session_id: Uuid,
        room_id: Uuid,
        pipeline: Arc<Mutex<Pipeline>>,
        data_forward: tokio::task::JoinHandle<()>,
        audio_forward: tokio::task::JoinHandle<()>,
    ) {
        let drained = tokio::time::timeout(Duration::from_secs(2), pipeline.lock()).await;
        match drained {
            Ok(guard) => drop(guard),
            Err(_) => warn!(participant = %identity, "in-flight turn did not drain within 2s"),
        }

        // Dropping the last Arc to `pipeline` drops its `data_tx`/`audio_tx`
        // senders, which closes the forwarding tasks' channels.
        drop(pipeline);
        let _ = data_forward.await;
        let _ = audio_forward.await;

        self.deps.session_store.touch(session_id).await.ok();
        let _ = room_id;
        self.participants.lock().await.remove(identity);
        self.ack_senders.lock().await.remove(identity);
        info!(participant = %identity, "participant orchestrator task ended");
    }

    /// Disconnect the whole call. Sends a farewell transcription on the data
    /// channel first, then closes the room (§4.H).
    pub async fn close(&self) {
        let farewell = DataMessage::new(0, DataMessagePayload::Transcription {
            speaker: crate::data_channel::Speaker::System,
            text: "The assistant is leaving the call.".to_string(),
        });
        forward_data_message(&self.room, &farewell).await;

        let cancels: Vec<CancellationToken> = self.participants.lock().await.drain().map(|(_, c)| c).collect();
        for cancel in cancels {
            cancel.cancel();
        }

        if let Err(e) = self.room.close().await {
            warn!(room = %self.room_name, error = %e, "error closing room");
        }
    }
}

async fn handle_utterance(
    pipeline: Arc<Mutex<Pipeline>>,
    current_cancel: Arc<Mutex<CancellationToken>>,
    store: Arc<crate::session::SessionStore>,
    session_id: Uuid,
    room_id: Uuid,
    samples: Vec<i16>,
) {
    let mut guard = pipeline.lock().await;

    let fresh_cancel = CancellationToken::new();
    *current_cancel.lock().await = fresh_cancel.clone();
    guard.reset_cancel(fresh_cancel);

    let language = store.update(session_id, room_id, |state| state.language.clone()).await;

    match guard.transcribe_final(&samples, language.as_deref()).await {
        Ok(text) if !text.trim().is_empty() => {
            store.update(session_id, room_id, |state| state.turn_controller.on_thinking_start()).await;
            let history = store.update(session_id, room_id, |state| build_history(&state.turns)).await;
            store.update(session_id, room_id, |state| state.turn_controller.on_assistant_speaking_start()).await;

            match guard.run_turn(&history).await {
                Ok(()) => {
                    store.update(session_id, room_id, |state| state.turn_controller.on_assistant_speaking_end()).await;
                }
                Err(PipelineError::Cancelled) => {
                    store.update(session_id, room_id, |state| state.turn_controller.on_assistant_speaking_end()).await;
                }
                Err(e) => warn!(error = %e, "pipeline run_turn failed"),
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "transcription failed"),
    }
}
