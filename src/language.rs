//! Language Policy (§4.I): join-time resolution, lock/oscillation-avoidance,
//! and the per-language (STT model, TTS voice) table with a mandatory
//! multilingual fallback. The per-language table is the same
//! "code → concrete provider identifiers" shape as
//! `voice::capabilities::ModelCapabilityRegistry`, just keyed by language
//! instead of by model id.

use std::collections::HashMap;

/// Confidence an STT-detected language must clear to participate in
/// selection or lock-change decisions (§4.I).
pub const DETECTION_CONFIDENCE_THRESHOLD: f32 = 0.8;
/// Consecutive utterances at or above threshold confidence needed to change
/// an already-locked language (§4.I).
pub const LOCK_CHANGE_STREAK: u32 = 3;

#[derive(Debug, Clone)]
pub struct LanguageModels {
    pub stt_model_id: String,
    pub tts_voice_id: String,
}

/// Per-language provider selection table; MUST contain a `"multi"`
/// multilingual fallback entry (§4.I).
pub struct LanguageTable {
    entries: HashMap<String, LanguageModels>,
}

impl LanguageTable {
    pub fn default_table() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            "en".to_string(),
            LanguageModels { stt_model_id: "whisper-base.en".to_string(), tts_voice_id: "en-US-AriaNeural".to_string() },
        );
        entries.insert(
            "es".to_string(),
            LanguageModels { stt_model_id: "whisper-base".to_string(), tts_voice_id: "es-ES-ElviraNeural".to_string() },
        );
        entries.insert(
            "fr".to_string(),
            LanguageModels { stt_model_id: "whisper-base".to_string(), tts_voice_id: "fr-FR-DeniseNeural".to_string() },
        );
        entries.insert(
            "de".to_string(),
            LanguageModels { stt_model_id: "whisper-base".to_string(), tts_voice_id: "de-DE-KatjaNeural".to_string() },
        );
        entries.insert(
            "multi".to_string(),
            LanguageModels { stt_model_id: "whisper-base".to_string(), tts_voice_id: "en-US-AriaNeural".to_string() },
        );
        Self { entries }
    }

    /// Resolve a language code to its provider selection, consulting the
    /// denylist first and falling back to the multilingual entry for any
    /// code with no dedicated row or that is denylisted.
    pub fn resolve<'a>(&'a self, language: &str, denylist: &[String]) -> &'a LanguageModels {
        if denylist.iter().any(|d| d == language) {
            return self.fallback();
        }
        self.entries.get(language).unwrap_or_else(|| self.fallback())
    }

    fn fallback(&self) -> &LanguageModels {
        self.entries.get("multi").expect("language table must carry a multilingual fallback entry")
    }
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self::default_table()
    }
}

/// A single STT language-detection observation, fed into `LanguagePolicy`.
#[derive(Debug, Clone)]
pub struct DetectedLanguage {
    pub code: String,
    pub confidence: f32,
}

/// Per-session language lock state machine (§4.I).
pub struct LanguagePolicy {
    locked: Option<String>,
    streak_language: Option<String>,
    streak_count: u32,
}

impl LanguagePolicy {
    pub fn new() -> Self {
        Self { locked: None, streak_language: None, streak_count: 0 }
    }

    pub fn locked_language(&self) -> Option<&str> {
        self.locked.as_deref()
    }

    /// Resolve the initial language on join: metadata hint, else the first
    /// confident STT detection, else the server default (§4.I).
    pub fn resolve_initial(
        &mut self,
        metadata_hint: Option<&str>,
        first_detection: Option<&DetectedLanguage>,
        server_default: &str,
    ) -> String {
        let resolved = if let Some(hint) = metadata_hint {
            hint.to_string()
        } else if let Some(detected) = first_detection {
            if detected.confidence >= DETECTION_CONFIDENCE_THRESHOLD {
                detected.code.clone()
            } else {
                server_default.to_string()
            }
        } else {
            server_default.to_string()
        };
        self.locked = Some(resolved.clone());
        resolved
    }

    /// An explicit `state_update{language}` message always wins immediately
    /// (§4.I).
    pub fn force_language(&mut self, language: impl Into<String>) {
        self.locked = Some(language.into());
        self.streak_language = None;
        self.streak_count = 0;
    }

    /// Feed one STT detection from an already-locked session. Returns the
    /// new locked language if this detection completed a
    /// `LOCK_CHANGE_STREAK`-long run at or above threshold confidence for a
    /// language different from the current lock; otherwise `None`.
    pub fn observe_detection(&mut self, detection: &DetectedLanguage) -> Option<String> {
        if detection.confidence < DETECTION_CONFIDENCE_THRESHOLD {
            self.streak_language = None;
            self.streak_count = 0;
            return None;
        }

        if self.locked.as_deref() == Some(detection.code.as_str()) {
            self.streak_language = None;
            self.streak_count = 0;
            return None;
        }

        if self.streak_language.as_deref() == Some(detection.code.as_str()) {
            self.streak_count += 1;
        } else {
            self.streak_language = Some(detection.code.clone());
            self.streak_count = 1;
        }

        if self.streak_count >= LOCK_CHANGE_STREAK {
            self.locked = Some(detection.code.clone());
            self.streak_language = None;
            self.streak_count = 0;
            return self.locked.clone();
        }

        None
    }
}

impl Default for LanguagePolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_table_has_multilingual_fallback() {
        let table = LanguageTable::default_table();
        let resolved = table.resolve("xx-unknown", &[]);
        assert_eq!(resolved.tts_voice_id, "en-US-AriaNeural");
    }

    #[test]
    fn test_denylisted_language_falls_back() {
        let table = LanguageTable::default_table();
        let resolved = table.resolve("es", &["es".to_string()]);
        assert_eq!(resolved.stt_model_id, "whisper-base");
        assert_eq!(resolved.tts_voice_id, "en-US-AriaNeural");
    }

    #[test]
    fn test_resolve_initial_prefers_metadata_hint() {
        let mut policy = LanguagePolicy::new();
        let resolved = policy.resolve_initial(Some("fr"), None, "en");
        assert_eq!(resolved, "fr");
        assert_eq!(policy.locked_language(), Some("fr"));
    }

    #[test]
    fn test_resolve_initial_falls_back_to_server_default_on_low_confidence() {
        let mut policy = LanguagePolicy::new();
        let detection = DetectedLanguage { code: "de".to_string(), confidence: 0.4 };
        let resolved = policy.resolve_initial(None, Some(&detection), "en");
        assert_eq!(resolved, "en");
    }

    #[test]
    fn test_lock_does_not_change_on_single_confident_detection() {
        let mut policy = LanguagePolicy::new();
        policy.resolve_initial(Some("en"), None, "en");
        let detection = DetectedLanguage { code: "es".to_string(), confidence: 0.9 };
        assert_eq!(policy.observe_detection(&detection), None);
        assert_eq!(policy.locked_language(), Some("en"));
    }

    #[test]
    fn test_lock_changes_after_three_consecutive_confident_detections() {
        let mut policy = LanguagePolicy::new();
        policy.resolve_initial(Some("en"), None, "en");
        let detection = DetectedLanguage { code: "es".to_string(), confidence: 0.9 };
        assert_eq!(policy.observe_detection(&detection), None);
        assert_eq!(policy.observe_detection(&detection), None);
        assert_eq!(policy.observe_detection(&detection), Some("es".to_string()));
        assert_eq!(policy.locked_language(), Some("es"));
    }

    #[test]
    fn test_explicit_force_overrides_immediately() {
        let mut policy = LanguagePolicy::new();
        policy.resolve_initial(Some("en"), None, "en");
        policy.force_language("ja");
        assert_eq!(policy.locked_language(), Some("ja"));
    }
}
