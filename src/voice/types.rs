//! Shared voice-pipeline types: speakers, participants, conversation context,
//! and the data-model entities from the session/turn/response domain.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceEvent {
    pub session_id: Uuid,
    pub speaker_id: Uuid,
    pub speaker_name: String,
    pub speaker_type: SpeakerType,
    pub transcript: String,
    pub confidence: f32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerType {
    Human,
    Persona,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceParticipant {
    pub user_id: Uuid,
    pub display_name: String,
    pub participant_type: SpeakerType,
    pub expertise: Vec<String>,
    /// Audio-native models (realtime speech-to-speech adapters) hear raw audio
    /// through the mixer's mix-minus stream. They must NOT receive text
    /// transcriptions too — otherwise they respond twice (once to audio, once
    /// to text). See `pipeline::Pipeline::run_turn`.
    #[serde(default)]
    pub is_audio_native: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub session_id: Uuid,
    pub room_id: Uuid,
    pub recent_utterances: Vec<UtteranceEvent>,
    pub last_responder_id: Option<Uuid>,
    pub turn_count: u32,
}

impl ConversationContext {
    pub fn new(session_id: Uuid, room_id: Uuid) -> Self {
        Self {
            session_id,
            room_id,
            recent_utterances: Vec::new(),
            last_responder_id: None,
            turn_count: 0,
        }
    }

    pub fn add_utterance(&mut self, event: UtteranceEvent) {
        self.recent_utterances.push(event);
        if self.recent_utterances.len() > 20 {
            self.recent_utterances.remove(0);
        }
        self.turn_count += 1;
    }
}

// ============================================================================
// Binary Frame Protocol (audio only — video/avatar dropped, see DESIGN.md)
// ============================================================================

/// Binary frame type discriminator (first byte of every binary WebSocket message)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// PCM16 audio samples (i16 little-endian)
    Audio = 0x01,
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Audio),
            _ => None,
        }
    }
}

// ============================================================================
// Data model — §3
// ============================================================================

/// Role of a Turn's originator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// One user or assistant contribution to the dialogue (§3 Turn, GLOSSARY).
///
/// Invariant: for any assistant turn T, there exists a user turn U with
/// `U.turn_id < T.turn_id` and no other user turn between them for that
/// participant within the session (modulo system messages). This invariant is
/// enforced by construction in `pipeline::Pipeline::handle_final_transcript`,
/// which is the only code path that appends a Turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: u64,
    pub role: TurnRole,
    pub text: String,
    pub audio_ref: Option<Uuid>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub interrupted: bool,
}

impl Turn {
    pub fn new_user(turn_id: u64, text: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            turn_id,
            role: TurnRole::User,
            text,
            audio_ref: None,
            started_at: now,
            completed_at: Some(now),
            interrupted: false,
        }
    }

    pub fn new_assistant(turn_id: u64, response_id: Uuid) -> Self {
        Self {
            turn_id,
            role: TurnRole::Assistant,
            text: String::new(),
            audio_ref: Some(response_id),
            started_at: chrono::Utc::now(),
            completed_at: None,
            interrupted: false,
        }
    }

    pub fn complete(&mut self, text: String, interrupted: bool) {
        self.text = text;
        self.interrupted = interrupted;
        self.completed_at = Some(chrono::Utc::now());
    }
}

/// Status of a tool invocation (§3 ToolCall).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Ok,
    Error,
    Timeout,
}

/// A structured function invocation requested by the LLM (§3 ToolCall,
/// GLOSSARY). Invariant: for each `call_id` the pipeline produces exactly
/// one tool_result item before requesting a follow-up model response — see
/// `pipeline::Pipeline::run_tool_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: Uuid,
    pub name: String,
    pub arguments: serde_json::Value,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub status: ToolCallStatus,
    pub attempt_count: u32,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            name: name.into(),
            arguments,
            started_at: chrono::Utc::now(),
            status: ToolCallStatus::Pending,
            attempt_count: 0,
        }
    }
}

/// A contiguous user speech segment, delimited by VAD start/stop (§3
/// Utterance, GLOSSARY). Invariant: each utterance yields at most one final
/// transcript; interim transcripts may be emitted but are superseded.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub utterance_id: Uuid,
    pub participant_id: String,
    pub interim_transcript: Option<String>,
    pub final_transcript: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Utterance {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            utterance_id: Uuid::new_v4(),
            participant_id: participant_id.into(),
            interim_transcript: None,
            final_transcript: None,
            started_at: chrono::Utc::now(),
            ended_at: None,
        }
    }
}

/// PCM16 mono audio with an explicit sample rate and start timestamp (§3
/// AudioFrame). Invariant: frames handed to the transport are at
/// `ROOM_SAMPLE_RATE`; frames handed to providers are at provider-native rate
/// (`AUDIO_SAMPLE_RATE`). Conversion happens exclusively in `utils::audio`.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u8,
    pub start_ts: u64,
}

impl AudioFrame {
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

#[cfg(test)]
mod frame_tests {
    use super::*;

    #[test]
    fn test_frame_kind_roundtrip() {
        assert_eq!(FrameKind::from_byte(0x01), Some(FrameKind::Audio));
        assert_eq!(FrameKind::from_byte(0xFF), None);
    }

    #[test]
    fn test_turn_invariant_assistant_has_audio_ref() {
        let response_id = Uuid::new_v4();
        let turn = Turn::new_assistant(2, response_id);
        assert_eq!(turn.audio_ref, Some(response_id));
        assert!(turn.completed_at.is_none());
    }

    #[test]
    fn test_tool_call_starts_pending() {
        let call = ToolCall::new("search_flights", serde_json::json!({"origin": "MIA"}));
        assert_eq!(call.status, ToolCallStatus::Pending);
        assert_eq!(call.attempt_count, 0);
    }

    #[test]
    fn test_utterance_starts_without_final() {
        let utterance = Utterance::new("user-42");
        assert!(utterance.final_transcript.is_none());
    }

    #[test]
    fn test_audio_frame_samples_per_channel() {
        let frame = AudioFrame {
            samples: vec![0i16; 480],
            sample_rate: 48000,
            channels: 1,
            start_ts: 0,
        };
        assert_eq!(frame.samples_per_channel(), 480);
    }
}
