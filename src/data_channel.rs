//! Data-Channel Protocol (§4.B, §6 message catalog).
//!
//! Length-prefixed-at-the-websocket-framing-layer JSON envelopes with
//! type/sequence/ack semantics, modeled the same way the teacher's
//! `voice::call_server::CallMessage` models its wire protocol: a single
//! `#[serde(tag = "type")]` enum exported to TypeScript via `ts-rs` for the
//! (out-of-scope) browser client, plus a small receiver-side component that
//! enforces per-sender ordering and bounded out-of-order buffering.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

/// Out-of-order buffer capacity per sender (§4.B).
pub const OUT_OF_ORDER_CAPACITY: usize = 32;
/// How long a buffered out-of-order message waits for its predecessor before
/// being delivered anyway (§4.B).
pub const OUT_OF_ORDER_TIMEOUT: Duration = Duration::from_millis(1500);
/// Max ack retries for `ack_required` messages (§4.B).
pub const MAX_ACK_RETRIES: u32 = 3;
/// Interval between ack retries (§4.B).
pub const ACK_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum DataChannelError {
    #[error("message missing required field: {0}")]
    MissingField(&'static str),
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Speaker tag carried by `transcription` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../bindings/Speaker.ts")]
pub enum Speaker {
    User,
    Assistant,
    System,
}

/// The full data-channel message catalog (§6).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "../bindings/DataMessagePayload.ts")]
pub enum DataMessagePayload {
    Transcription { speaker: Speaker, text: String },
    PreSpeechText { speech_id: Uuid, sequence: u64, text: String },
    SpeechStarting { speech_id: Uuid },
    TextDisplayed { speech_id: Uuid },
    Thinking { id: Uuid, text: String },
    HideThinking { id: Uuid },
    StateUpdate { key: String, value: serde_json::Value },
    EnvironmentChanged { environment: String },
    InterruptionToggle { enabled: bool },
    TestUserInput { text: String, timestamp: u64 },
}

impl DataMessagePayload {
    /// All types except transport-heartbeat travel the reliable lane (§4.B);
    /// this crate defines no heartbeat payload, so every message is reliable.
    pub fn requires_ack(&self) -> bool {
        matches!(self, Self::PreSpeechText { .. })
    }
}

/// The message envelope wrapping every payload (§3 DataMessage, §4.B).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/DataMessage.ts")]
pub struct DataMessage {
    pub msg_id: Uuid,
    pub sequence: u64,
    pub timestamp: u64,
    pub payload: DataMessagePayload,
    pub ack_required: bool,
}

impl DataMessage {
    pub fn new(sequence: u64, payload: DataMessagePayload) -> Self {
        let ack_required = payload.requires_ack();
        Self {
            msg_id: Uuid::new_v4(),
            sequence,
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
            payload,
            ack_required,
        }
    }
}

/// Monotonic per-participant sequence counter for outbound messages. Reset
/// only when the Session State Store evicts the participant (§4.E).
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: u64,
}

impl SequenceCounter {
    pub fn next(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }
}

struct Buffered {
    message: DataMessage,
    received_at: Instant,
}

/// Receiver-side per-sender ordering buffer (§4.B): processes messages in
/// sequence order, buffering out-of-order arrivals up to
/// `OUT_OF_ORDER_CAPACITY` until the predecessor arrives or
/// `OUT_OF_ORDER_TIMEOUT` elapses, whichever first. Also deduplicates by
/// `msg_id` so that sender-side ack retries are idempotent (§8 "no duplicates
/// are processed twice").
pub struct SequenceReceiver {
    expected_sequence: u64,
    pending: BTreeMap<u64, Buffered>,
    seen_msg_ids: std::collections::HashSet<Uuid>,
}

impl Default for SequenceReceiver {
    fn default() -> Self {
        Self {
            expected_sequence: 0,
            pending: BTreeMap::new(),
            seen_msg_ids: std::collections::HashSet::new(),
        }
    }
}

impl SequenceReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inbound message; returns the messages now ready for
    /// processing, in order. A message whose `msg_id` was already processed
    /// is dropped silently (idempotent delivery).
    pub fn receive(&mut self, message: DataMessage) -> Vec<DataMessage> {
        if self.seen_msg_ids.contains(&message.msg_id) {
            return Vec::new();
        }

        if message.sequence < self.expected_sequence {
            // Already delivered (or a retry of an already-acked message).
            return Vec::new();
        }

        if self.pending.len() >= OUT_OF_ORDER_CAPACITY && !self.pending.contains_key(&message.sequence) {
            // Buffer full: drop the oldest rather than grow unbounded.
            if let Some((&oldest, _)) = self.pending.iter().next() {
                self.pending.remove(&oldest);
            }
        }

        self.pending.insert(message.sequence, Buffered { message, received_at: Instant::now() });
        self.drain_ready()
    }

    /// Call periodically (e.g. every 250ms) to release messages whose
    /// predecessor never arrived within `OUT_OF_ORDER_TIMEOUT`.
    pub fn poll_timeouts(&mut self) -> Vec<DataMessage> {
        if let Some((&seq, buffered)) = self.pending.iter().next() {
            if seq > self.expected_sequence && buffered.received_at.elapsed() >= OUT_OF_ORDER_TIMEOUT {
                self.expected_sequence = seq;
                return self.drain_ready();
            }
        }
        Vec::new()
    }

    fn drain_ready(&mut self) -> Vec<DataMessage> {
        let mut ready = Vec::new();
        while let Some(buffered) = self.pending.remove(&self.expected_sequence) {
            self.seen_msg_ids.insert(buffered.message.msg_id);
            ready.push(buffered.message);
            self.expected_sequence += 1;
        }
        ready
    }
}

/// Tracks outstanding `ack_required` sends for retry (§4.B: "Sender retries
/// ack_required messages up to 3 times at 1.0 s intervals").
#[derive(Debug)]
pub struct AckTracker {
    pub message: DataMessage,
    pub sent_at: Instant,
    pub attempts: u32,
}

impl AckTracker {
    pub fn new(message: DataMessage) -> Self {
        Self { message, sent_at: Instant::now(), attempts: 1 }
    }

    pub fn should_retry(&self) -> bool {
        self.attempts < MAX_ACK_RETRIES && self.sent_at.elapsed() >= ACK_RETRY_INTERVAL
    }

    pub fn record_retry(&mut self) {
        self.attempts += 1;
        self.sent_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(seq: u64) -> DataMessage {
        DataMessage::new(seq, DataMessagePayload::Thinking { id: Uuid::new_v4(), text: "...".into() })
    }

    #[test]
    fn test_in_order_delivery() {
        let mut recv = SequenceReceiver::new();
        let ready = recv.receive(msg(0));
        assert_eq!(ready.len(), 1);
        let ready = recv.receive(msg(1));
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn test_out_of_order_buffered_until_predecessor() {
        let mut recv = SequenceReceiver::new();
        assert!(recv.receive(msg(1)).is_empty());
        let ready = recv.receive(msg(0));
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].sequence, 0);
        assert_eq!(ready[1].sequence, 1);
    }

    #[test]
    fn test_duplicate_msg_id_is_noop() {
        let mut recv = SequenceReceiver::new();
        let m = msg(0);
        let first = recv.receive(m.clone());
        assert_eq!(first.len(), 1);
        let second = recv.receive(m);
        assert!(second.is_empty());
    }

    #[test]
    fn test_pre_speech_text_requires_ack() {
        let payload = DataMessagePayload::PreSpeechText { speech_id: Uuid::new_v4(), sequence: 0, text: "hi".into() };
        assert!(payload.requires_ack());
        let payload = DataMessagePayload::Transcription { speaker: Speaker::User, text: "hi".into() };
        assert!(!payload.requires_ack());
    }

    #[test]
    fn test_ack_tracker_retry_budget() {
        let mut tracker = AckTracker::new(msg(0));
        assert_eq!(tracker.attempts, 1);
        tracker.record_retry();
        tracker.record_retry();
        assert_eq!(tracker.attempts, 3);
        assert!(!tracker.should_retry());
    }

    #[test]
    fn test_sequence_counter_monotonic() {
        let mut counter = SequenceCounter::default();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }
}
