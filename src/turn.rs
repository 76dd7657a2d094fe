//! Turn & Interruption Controller (§4.D).
//!
//! One `TurnController` per participant. Tracks the
//! Idle → UserSpeaking → Thinking → AssistantSpeaking state machine and
//! decides when the assistant should duck, pause, or fully abandon its
//! current response in favor of a user barge-in. Mirrors the state-flag style
//! `voice::mixer::ParticipantStream` uses for its own (local, VAD-only)
//! speaking state, generalized here to the whole participant turn lifecycle.

use std::time::{Duration, Instant};

/// Debounce window before a transient VAD blip is treated as a real
/// interruption (§4.D).
pub const INTERRUPTION_DEBOUNCE: Duration = Duration::from_millis(100);
/// Coalescing window: multiple barge-in signals within this window count as
/// one interruption event (§4.D).
pub const BARGE_IN_COALESCE_WINDOW: Duration = Duration::from_millis(200);
/// Ducking attack time: how fast assistant audio fades down on barge-in.
pub const DUCK_ATTACK: Duration = Duration::from_millis(100);
/// Ducking release time: how fast assistant audio returns to full volume.
pub const DUCK_RELEASE: Duration = Duration::from_millis(300);
/// Linear gain applied to assistant audio while ducked (-14 dB ≈ 0.2 linear).
pub const DUCK_GAIN: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    UserSpeaking,
    Thinking,
    AssistantSpeaking,
}

/// Outcome of feeding a VAD event into the controller; tells the pipeline and
/// room layer what action to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnAction {
    /// No state change, nothing to do.
    None,
    /// Assistant should start ducking its output toward `DUCK_GAIN`.
    DuckAssistant,
    /// A genuine barge-in: cancel the in-flight response, discard remaining
    /// TTS audio, start a new user turn.
    Interrupt,
    /// The debounced speech blip ended without escalating to an interrupt;
    /// assistant should release the duck back to full volume.
    ReleaseDuck,
}

/// Per-participant interruption/turn state machine (§4.D).
///
/// Invariant: `state` only ever moves along
/// `Idle -> UserSpeaking -> Thinking -> AssistantSpeaking -> Idle`, except
/// for the barge-in shortcut `AssistantSpeaking -> UserSpeaking`.
pub struct TurnController {
    state: TurnState,
    interruptions_enabled: bool,
    /// When the current candidate interruption's VAD-speech signal first
    /// arrived, for debounce/coalescing.
    candidate_since: Option<Instant>,
    ducked: bool,
}

impl TurnController {
    pub fn new(interruptions_enabled: bool) -> Self {
        Self {
            state: TurnState::Idle,
            interruptions_enabled,
            candidate_since: None,
            ducked: false,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_ducked(&self) -> bool {
        self.ducked
    }

    pub fn set_interruptions_enabled(&mut self, enabled: bool) {
        self.interruptions_enabled = enabled;
    }

    /// Call when VAD reports speech-start for this participant. Returns the
    /// action the caller should take.
    pub fn on_speech_start(&mut self) -> TurnAction {
        match self.state {
            TurnState::Idle => {
                self.state = TurnState::UserSpeaking;
                TurnAction::None
            }
            TurnState::UserSpeaking | TurnState::Thinking => TurnAction::None,
            TurnState::AssistantSpeaking => {
                if !self.interruptions_enabled {
                    return TurnAction::None;
                }
                let now = Instant::now();
                let since = *self.candidate_since.get_or_insert(now);
                if now.duration_since(since) >= INTERRUPTION_DEBOUNCE {
                    self.state = TurnState::UserSpeaking;
                    self.candidate_since = None;
                    self.ducked = false;
                    TurnAction::Interrupt
                } else {
                    self.ducked = true;
                    TurnAction::DuckAssistant
                }
            }
        }
    }

    /// Call when VAD reports speech-end (the debounce/coalesce window for a
    /// candidate interruption expired without crossing the threshold, or a
    /// genuine user utterance ended).
    pub fn on_speech_end(&mut self) -> TurnAction {
        match self.state {
            TurnState::AssistantSpeaking if self.ducked => {
                // Candidate interruption fizzled within the coalescing window.
                if let Some(since) = self.candidate_since {
                    if since.elapsed() < BARGE_IN_COALESCE_WINDOW {
                        self.candidate_since = None;
                        self.ducked = false;
                        return TurnAction::ReleaseDuck;
                    }
                }
                TurnAction::None
            }
            TurnState::UserSpeaking => {
                self.state = TurnState::Thinking;
                TurnAction::None
            }
            _ => TurnAction::None,
        }
    }

    /// Call when the pipeline starts generating a response (LLM dispatched).
    pub fn on_thinking_start(&mut self) {
        self.state = TurnState::Thinking;
    }

    /// Call when the first TTS audio begins streaming out for this turn.
    pub fn on_assistant_speaking_start(&mut self) {
        self.state = TurnState::AssistantSpeaking;
        self.ducked = false;
        self.candidate_since = None;
    }

    /// Call when the assistant finishes speaking (naturally or due to an
    /// interruption already handled via `Interrupt`).
    pub fn on_assistant_speaking_end(&mut self) {
        self.state = TurnState::Idle;
        self.ducked = false;
        self.candidate_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_to_user_speaking() {
        let mut ctl = TurnController::new(true);
        assert_eq!(ctl.on_speech_start(), TurnAction::None);
        assert_eq!(ctl.state(), TurnState::UserSpeaking);
    }

    #[test]
    fn test_full_turn_lifecycle() {
        let mut ctl = TurnController::new(true);
        ctl.on_speech_start();
        ctl.on_speech_end();
        assert_eq!(ctl.state(), TurnState::Thinking);
        ctl.on_thinking_start();
        ctl.on_assistant_speaking_start();
        assert_eq!(ctl.state(), TurnState::AssistantSpeaking);
        ctl.on_assistant_speaking_end();
        assert_eq!(ctl.state(), TurnState::Idle);
    }

    #[test]
    fn test_barge_in_ducks_before_debounce_elapses() {
        let mut ctl = TurnController::new(true);
        ctl.on_assistant_speaking_start();
        let action = ctl.on_speech_start();
        assert_eq!(action, TurnAction::DuckAssistant);
        assert!(ctl.is_ducked());
        assert_eq!(ctl.state(), TurnState::AssistantSpeaking);
    }

    #[test]
    fn test_disabled_interruptions_never_interrupt() {
        let mut ctl = TurnController::new(false);
        ctl.on_assistant_speaking_start();
        assert_eq!(ctl.on_speech_start(), TurnAction::None);
        assert_eq!(ctl.state(), TurnState::AssistantSpeaking);
    }

    #[test]
    fn test_fizzled_candidate_releases_duck() {
        let mut ctl = TurnController::new(true);
        ctl.on_assistant_speaking_start();
        ctl.on_speech_start();
        assert!(ctl.is_ducked());
        let action = ctl.on_speech_end();
        assert_eq!(action, TurnAction::ReleaseDuck);
        assert!(!ctl.is_ducked());
    }
}
