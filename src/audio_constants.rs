//! Audio constants — single source of truth.
//!
//! All audio-related constants MUST be imported from here.
//! Do not hardcode sample rates, buffer sizes, etc. anywhere else.

/// Internal/provider-native sample rate used by STT, TTS and VAD (Hz).
pub const AUDIO_SAMPLE_RATE: u32 = 16000;

/// Room transport sample rate (§4.A: frames handed to the transport are
/// always 48 kHz mono PCM16; frames handed to providers are provider-native).
pub const ROOM_SAMPLE_RATE: u32 = 48000;

/// Frame size in samples (512 samples = 32ms at 16kHz)
pub const AUDIO_FRAME_SIZE: usize = 512;

/// Frame duration in milliseconds
pub const AUDIO_FRAME_DURATION_MS: u64 = 32;

/// Playback buffer duration in seconds
pub const AUDIO_PLAYBACK_BUFFER_SECONDS: u32 = 2;

/// Audio broadcast channel capacity (number of frames). Matches the
/// bounded-channel capacity named in §5 (64 frames / 128 messages) scaled up
/// for the mixer's internal ring, which buffers more deeply than a single
/// task's inbox.
pub const AUDIO_CHANNEL_CAPACITY: usize = 2000;

/// Bytes per sample (16-bit PCM = 2 bytes)
pub const BYTES_PER_SAMPLE: usize = 2;

/// WebSocket call server port (local-dev/test room backend)
pub const CALL_SERVER_PORT: u16 = 50053;

/// Default LiveKit dev-mode credentials, used only when `ROOM_API_KEY` /
/// `ROOM_API_SECRET` are unset and the server is started against a local
/// `livekit-server --dev` instance.
pub const LIVEKIT_DEV_KEY: &str = "devkey";
pub const LIVEKIT_DEV_SECRET: &str = "secret";
pub const LIVEKIT_PORT: u16 = 7880;
