//! Voice call handling: wire types, provider capability interfaces (VAD/STT/
//! TTS), mix-minus audio routing, and the two room backends (`call_server`'s
//! WebSocket room and `room`'s LiveKit-backed Room Session Manager).

pub mod audio_router;
pub mod call_server;
pub mod capabilities;
pub mod handle;
pub mod mixer;
pub mod media;
pub mod room;
pub mod stt;
pub mod stt_service;
pub mod tts;
pub mod tts_service;
pub mod types;
pub mod vad;

pub use handle::Handle;
pub use room::{RoomError, RoomSession};
