//! Environment-driven configuration (§4.J, §6).
//!
//! A `Config` snapshot is cloned into each orchestrator task at spawn time
//! (§9: "pass an explicit SessionContext value containing ... a config
//! snapshot"). `ConfigHandle` holds the live snapshot behind
//! `arc_swap::ArcSwap` so that VAD thresholds, environment presets,
//! per-language tables and feature flags can be hot-reloaded (§4.J) without
//! any in-flight task taking a lock.

use arc_swap::ArcSwap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A named VAD tuning profile (quiet/medium/noisy) — GLOSSARY "Environment preset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Quiet,
    Medium,
    Noisy,
}

impl Environment {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" => Some(Self::Quiet),
            "medium" => Some(Self::Medium),
            "noisy" => Some(Self::Noisy),
            _ => None,
        }
    }
}

/// VAD tuning parameters for one environment preset.
#[derive(Debug, Clone, Copy)]
pub struct VadTuning {
    pub min_silence_ms: u32,
    pub min_speaking_ms: u32,
    pub threshold: f32,
}

fn preset_table() -> HashMap<Environment, VadTuning> {
    let mut m = HashMap::new();
    m.insert(
        Environment::Quiet,
        VadTuning { min_silence_ms: 500, min_speaking_ms: 150, threshold: 0.35 },
    );
    m.insert(
        Environment::Medium,
        VadTuning { min_silence_ms: 700, min_speaking_ms: 200, threshold: 0.5 },
    );
    m.insert(
        Environment::Noisy,
        VadTuning { min_silence_ms: 900, min_speaking_ms: 250, threshold: 0.65 },
    );
    m
}

/// Full process configuration, loaded once from environment variables and
/// held behind `ConfigHandle` for hot-reload.
#[derive(Debug, Clone)]
pub struct Config {
    pub room_url: String,
    pub room_api_key: String,
    pub room_api_secret: String,
    pub flight_api_url: String,

    pub default_language: String,
    pub language_denylist: Vec<String>,

    pub vad_profile: Environment,
    pub interruptions_enabled_default: bool,

    pub session_ttl: Duration,
    pub llm_soft_timeout: Duration,
    pub llm_hard_timeout: Duration,
    pub tool_primary_timeout: Duration,
    pub tool_fallback_timeout: Duration,
    pub enable_mock_fallback: bool,
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Load from the environment keys enumerated in §6, falling back to the
    /// defaults documented throughout §4.
    pub fn from_env() -> Self {
        let vad_profile = std::env::var("VAD_PROFILE")
            .ok()
            .and_then(|v| Environment::parse(&v))
            .unwrap_or(Environment::Medium);

        let language_denylist: Vec<String> = std::env::var("LANGUAGE_DENYLIST_JSON")
            .ok()
            .and_then(|v| serde_json::from_str(&v).ok())
            .unwrap_or_default();

        Self {
            room_url: env_str("ROOM_URL", "ws://localhost:7880"),
            room_api_key: env_str("ROOM_API_KEY", crate::audio_constants::LIVEKIT_DEV_KEY),
            room_api_secret: env_str("ROOM_API_SECRET", crate::audio_constants::LIVEKIT_DEV_SECRET),
            flight_api_url: env_str("FLIGHT_API_URL", "http://localhost:8090"),

            default_language: env_str("DEFAULT_LANGUAGE", "en"),
            language_denylist,

            vad_profile,
            interruptions_enabled_default: env_bool("INTERRUPTIONS_ENABLED_DEFAULT", true),

            session_ttl: Duration::from_secs(env_u64("SESSION_TTL_MINUTES", 30) * 60),
            llm_soft_timeout: Duration::from_millis(env_u64("LLM_SOFT_TIMEOUT_MS", 20_000)),
            llm_hard_timeout: Duration::from_millis(env_u64("LLM_HARD_TIMEOUT_MS", 40_000)),
            tool_primary_timeout: Duration::from_millis(env_u64("TOOL_PRIMARY_TIMEOUT_MS", 5_000)),
            tool_fallback_timeout: Duration::from_millis(env_u64("TOOL_FALLBACK_TIMEOUT_MS", 10_000)),
            enable_mock_fallback: env_bool("ENABLE_MOCK_FALLBACK", false),
        }
    }

    pub fn vad_tuning(&self) -> VadTuning {
        preset_table()[&self.vad_profile]
    }

    pub fn vad_tuning_for(&self, env: Environment) -> VadTuning {
        preset_table()[&env]
    }
}

impl std::hash::Hash for Environment {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (*self as u8).hash(state)
    }
}

/// Hot-reloadable handle to the live config snapshot. Cloning a `ConfigHandle`
/// is cheap (one `Arc` clone); `snapshot()` is lock-free.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<Config>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(config)) }
    }

    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    /// Lock-free read of the current config snapshot.
    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Hot-swap the live config (§4.J). Existing `Arc<Config>` snapshots held
    /// by in-flight orchestrator tasks keep their old values for the
    /// remainder of their current operation — not retroactively mutated.
    pub fn reload(&self, config: Config) {
        self.inner.store(Arc::new(config));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vad_tuning_escalates_with_noise() {
        let cfg = Config::from_env();
        let quiet = cfg.vad_tuning_for(Environment::Quiet);
        let noisy = cfg.vad_tuning_for(Environment::Noisy);
        assert!(noisy.threshold > quiet.threshold);
        assert!(noisy.min_silence_ms > quiet.min_silence_ms);
    }

    #[test]
    fn test_config_handle_reload_is_visible() {
        let handle = ConfigHandle::new(Config::from_env());
        let before = handle.snapshot();
        let mut next = (*before).clone();
        next.interruptions_enabled_default = !before.interruptions_enabled_default;
        handle.reload(next);
        let after = handle.snapshot();
        assert_ne!(before.interruptions_enabled_default, after.interruptions_enabled_default);
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("QUIET"), Some(Environment::Quiet));
        assert_eq!(Environment::parse("bogus"), None);
    }
}
