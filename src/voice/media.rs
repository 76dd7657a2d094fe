//! Media Abstraction Layer
//!
//! Defines track/session/room primitives over audio tracks. A participant's
//! `MediaSession` can carry more than one audio track (e.g. a listen-only
//! track for an AI participant plus a sendrecv track), and a `MediaRoom`
//! groups sessions for one call.

use crate::audio_constants::{AUDIO_FRAME_SIZE, AUDIO_SAMPLE_RATE};
use crate::voice::handle::Handle;
use std::collections::HashMap;

// ============================================================================
// Track Types
// ============================================================================

/// Track identifier — unique within a session
pub type TrackId = u32;

/// Track direction — controls whether the participant sends, receives, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackDirection {
    /// Full duplex — participant both sends and receives this track
    SendRecv,
    /// Send only — participant produces media but doesn't consume
    SendOnly,
    /// Receive only — participant consumes media but doesn't produce
    RecvOnly,
}

/// Configuration for an audio track
#[derive(Debug, Clone)]
pub struct AudioTrackConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size: usize,
    pub frame_duration_ms: u64,
}

impl Default for AudioTrackConfig {
    fn default() -> Self {
        Self {
            sample_rate: AUDIO_SAMPLE_RATE,
            channels: 1,
            frame_size: AUDIO_FRAME_SIZE,
            frame_duration_ms: 20,
        }
    }
}

/// A single audio track within a session.
///
/// Each track has a direction (sendrecv/sendonly/recvonly) and its own
/// audio configuration.
#[derive(Debug)]
pub struct MediaTrack {
    pub id: TrackId,
    pub config: AudioTrackConfig,
    pub direction: TrackDirection,
    pub muted: bool,
    pub label: String,
}

impl MediaTrack {
    /// Create a default audio track (mono, 16kHz, 20ms frames, full duplex)
    pub fn default_audio(id: TrackId) -> Self {
        Self {
            id,
            config: AudioTrackConfig::default(),
            direction: TrackDirection::SendRecv,
            muted: false,
            label: "audio".into(),
        }
    }

    /// Create a receive-only audio track (for AI participants that only listen)
    pub fn listen_only_audio(id: TrackId) -> Self {
        Self {
            id,
            config: AudioTrackConfig::default(),
            direction: TrackDirection::RecvOnly,
            muted: false,
            label: "audio-listen".into(),
        }
    }
}

// ============================================================================
// Session — a participant's collection of tracks
// ============================================================================

/// A participant's media session — all audio tracks for one user in one room.
pub struct MediaSession {
    pub handle: Handle,
    pub user_id: String,
    pub display_name: String,
    pub is_ai: bool,
    tracks: HashMap<TrackId, MediaTrack>,
    next_track_id: TrackId,
}

impl MediaSession {
    /// Create a new session with no tracks
    pub fn new(handle: Handle, user_id: String, display_name: String, is_ai: bool) -> Self {
        Self {
            handle,
            user_id,
            display_name,
            is_ai,
            tracks: HashMap::new(),
            next_track_id: 0,
        }
    }

    /// Create a session with a default audio track (common case)
    pub fn with_audio(handle: Handle, user_id: String, display_name: String, is_ai: bool) -> Self {
        let mut session = Self::new(handle, user_id, display_name, is_ai);
        session.add_track(MediaTrack::default_audio(session.next_track_id));
        session
    }

    /// Add a track to this session
    pub fn add_track(&mut self, track: MediaTrack) -> TrackId {
        let id = track.id;
        self.tracks.insert(id, track);
        if id >= self.next_track_id {
            self.next_track_id = id + 1;
        }
        id
    }

    /// Remove a track
    pub fn remove_track(&mut self, id: TrackId) -> Option<MediaTrack> {
        self.tracks.remove(&id)
    }

    /// Get a track by ID
    pub fn track(&self, id: TrackId) -> Option<&MediaTrack> {
        self.tracks.get(&id)
    }

    /// Get a mutable track by ID
    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut MediaTrack> {
        self.tracks.get_mut(&id)
    }

    /// Get all audio tracks
    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.values()
    }

    /// Number of tracks
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Mute every track in this session
    pub fn mute_all(&mut self, muted: bool) {
        for track in self.tracks.values_mut() {
            track.muted = muted;
        }
    }
}

// ============================================================================
// Room — the call with all participants
// ============================================================================

/// A media room (call) — manages all participant sessions.
///
/// Audio mixing: mix-minus (each participant hears everyone except themselves).
pub struct MediaRoom {
    pub room_id: String,
    sessions: HashMap<Handle, MediaSession>,
}

impl MediaRoom {
    pub fn new(room_id: String) -> Self {
        Self {
            room_id,
            sessions: HashMap::new(),
        }
    }

    /// Add a participant session
    pub fn add_session(&mut self, session: MediaSession) {
        self.sessions.insert(session.handle, session);
    }

    /// Remove a participant session
    pub fn remove_session(&mut self, handle: &Handle) -> Option<MediaSession> {
        self.sessions.remove(handle)
    }

    /// Get a session
    pub fn session(&self, handle: &Handle) -> Option<&MediaSession> {
        self.sessions.get(handle)
    }

    /// Get a mutable session
    pub fn session_mut(&mut self, handle: &Handle) -> Option<&mut MediaSession> {
        self.sessions.get_mut(handle)
    }

    /// All sessions
    pub fn sessions(&self) -> impl Iterator<Item = &MediaSession> {
        self.sessions.values()
    }

    /// Number of participants
    pub fn participant_count(&self) -> usize {
        self.sessions.len()
    }

    /// Get all user IDs in this room
    pub fn user_ids(&self) -> Vec<&str> {
        self.sessions.values().map(|s| s.user_id.as_str()).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handle() -> Handle {
        Handle::new()
    }

    #[test]
    fn test_audio_track_defaults() {
        let track = MediaTrack::default_audio(0);
        assert!(!track.muted);
        assert_eq!(track.direction, TrackDirection::SendRecv);
        assert_eq!(track.config.sample_rate, AUDIO_SAMPLE_RATE);
        assert_eq!(track.config.channels, 1);
    }

    #[test]
    fn test_session_audio_only() {
        let handle = test_handle();
        let session = MediaSession::with_audio(handle, "user1".into(), "Alice".into(), false);

        assert_eq!(session.track_count(), 1);
        assert_eq!(session.audio_tracks().count(), 1);
    }

    #[test]
    fn test_session_mute_all() {
        let handle = test_handle();
        let mut session = MediaSession::with_audio(handle, "user1".into(), "Dan".into(), false);

        session.mute_all(true);

        for track in session.audio_tracks() {
            assert!(track.muted);
        }
    }

    #[test]
    fn test_room_basics() {
        let mut room = MediaRoom::new("room1".into());

        let h1 = test_handle();
        let h2 = test_handle();

        room.add_session(MediaSession::with_audio(h1, "u1".into(), "Alice".into(), false));
        room.add_session(MediaSession::with_audio(h2, "u2".into(), "Bob".into(), false));

        assert_eq!(room.participant_count(), 2);

        let ids = room.user_ids();
        assert!(ids.contains(&"u1"));
        assert!(ids.contains(&"u2"));
    }

    #[test]
    fn test_room_remove_session() {
        let mut room = MediaRoom::new("room1".into());
        let h1 = test_handle();

        room.add_session(MediaSession::with_audio(h1, "u1".into(), "Alice".into(), false));
        assert_eq!(room.participant_count(), 1);

        let removed = room.remove_session(&h1);
        assert!(removed.is_some());
        assert_eq!(room.participant_count(), 0);
    }

    #[test]
    fn test_ai_session() {
        let handle = test_handle();
        let session = MediaSession::with_audio(handle, "ai1".into(), "Gemini".into(), true);

        assert!(session.is_ai);
        assert_eq!(session.track_count(), 1);
    }

    #[test]
    fn test_listen_only_track() {
        let track = MediaTrack::listen_only_audio(0);
        assert_eq!(track.direction, TrackDirection::RecvOnly);
    }
}
