//! Typed configuration for the orchestrator binary.
//!
//! Credentials and endpoints load from environment variables only, so a
//! deployment never needs a credential file on disk; the non-secret,
//! hand-tuned timing constants may additionally be overlaid
//! from an optional `config.toml`. Parse errors surface through
//! `ConfigError` (`dolores_foundation::error::ConfigError`).

use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use dolores_foundation::error::ConfigError;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8765;

#[derive(Parser, Debug)]
#[command(name = "dolores", author, version, about = "Dolores voice orchestrator")]
pub struct Cli {
    /// Listening port override.
    #[arg(long)]
    pub port: Option<u16>,

    /// Path to an optional config.toml overlay for non-secret tunables.
    #[arg(long = "config")]
    pub config_path: Option<String>,

    /// Print the resolved non-secret settings and exit.
    #[arg(long = "list-config")]
    pub list_config: bool,
}

/// Hand-tuned timing constants, exposed as configuration rather than
/// baked in — each has a documented default and the loader rejects a
/// zero value for any of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub stt_start_timeout_ms: u64,
    pub llm_request_timeout_ms: u64,
    pub tts_request_timeout_ms: u64,
    pub playback_done_timeout_ms: u64,
    pub post_playback_mute_ms: u64,
    pub post_interrupt_mute_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub backpressure_high_watermark_bytes: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stt_start_timeout_ms: 10_000,
            llm_request_timeout_ms: 30_000,
            tts_request_timeout_ms: 30_000,
            playback_done_timeout_ms: 30_000,
            post_playback_mute_ms: 500,
            post_interrupt_mute_ms: 150,
            heartbeat_interval_ms: 30_000,
            backpressure_high_watermark_bytes: 8 * 1024 * 1024,
        }
    }
}

impl TimingConfig {
    pub fn stt_start_timeout(&self) -> Duration {
        Duration::from_millis(self.stt_start_timeout_ms)
    }
    pub fn llm_request_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_request_timeout_ms)
    }
    pub fn tts_request_timeout(&self) -> Duration {
        Duration::from_millis(self.tts_request_timeout_ms)
    }
    pub fn playback_done_timeout(&self) -> Duration {
        Duration::from_millis(self.playback_done_timeout_ms)
    }
    pub fn post_playback_mute(&self) -> Duration {
        Duration::from_millis(self.post_playback_mute_ms)
    }
    pub fn post_interrupt_mute(&self) -> Duration {
        Duration::from_millis(self.post_interrupt_mute_ms)
    }
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields: [(&str, u64); 7] = [
            ("stt_start_timeout_ms", self.stt_start_timeout_ms),
            ("llm_request_timeout_ms", self.llm_request_timeout_ms),
            ("tts_request_timeout_ms", self.tts_request_timeout_ms),
            ("playback_done_timeout_ms", self.playback_done_timeout_ms),
            ("post_playback_mute_ms", self.post_playback_mute_ms),
            ("post_interrupt_mute_ms", self.post_interrupt_mute_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::Validation {
                    field: name.to_string(),
                    reason: "must not be zero".to_string(),
                });
            }
        }
        if self.backpressure_high_watermark_bytes == 0 {
            return Err(ConfigError::Validation {
                field: "backpressure_high_watermark_bytes".to_string(),
                reason: "must not be zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolved process settings: upstream credentials/endpoints plus the
/// timing constants. Credentials are never `Serialize`d so `--list-config`
/// can print the struct without leaking them (see [`Settings::describe`]).
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub stt_credential: String,
    pub stt_endpoint: String,
    pub tts_credential: String,
    pub tts_endpoint: String,
    pub tts_voice_id: String,
    pub llm_credential: String,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub language_code: String,
    pub stt_streaming: bool,
    pub timing: TimingConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TomlOverlay {
    #[serde(default)]
    timing: TimingConfig,
    language_code: Option<String>,
}

impl Settings {
    /// Loads credentials/endpoints from the environment and overlays the
    /// non-secret tunables from an optional `config.toml`. Missing
    /// required credentials produce a `ConfigError::MissingField` the
    /// Process Supervisor turns into a non-zero exit before binding.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let stt_credential = required_env("DOLORES_STT_CREDENTIAL")?;
        let stt_endpoint = std::env::var("DOLORES_STT_ENDPOINT")
            .unwrap_or_else(|_| "wss://api.deepgram.com/v1/listen".to_string());
        let tts_credential = required_env("DOLORES_TTS_CREDENTIAL")?;
        let tts_endpoint = std::env::var("DOLORES_TTS_ENDPOINT")
            .unwrap_or_else(|_| "https://api.elevenlabs.io/v1/text-to-speech/stream".to_string());
        let tts_voice_id = required_env("DOLORES_TTS_VOICE_ID")?;
        let llm_credential = required_env("DOLORES_LLM_CREDENTIAL")?;
        let llm_endpoint = std::env::var("DOLORES_LLM_ENDPOINT")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string());
        let llm_model =
            std::env::var("DOLORES_LLM_MODEL").unwrap_or_else(|_| "claude-3-haiku".to_string());
        let stt_streaming = std::env::var("DOLORES_STT_STREAMING")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);

        let overlay = load_toml_overlay(cli.config_path.as_deref())?;

        let port = cli
            .port
            .or_else(|| std::env::var("DOLORES_PORT").ok().and_then(|s| s.parse().ok()))
            .unwrap_or(DEFAULT_PORT);
        let language_code = overlay
            .language_code
            .or_else(|| std::env::var("DOLORES_LANGUAGE").ok())
            .unwrap_or_else(|| "nl".to_string());

        overlay.timing.validate()?;

        Ok(Self {
            port,
            stt_credential,
            stt_endpoint,
            tts_credential,
            tts_endpoint,
            tts_voice_id,
            llm_credential,
            llm_endpoint,
            llm_model,
            language_code,
            stt_streaming,
            timing: overlay.timing,
        })
    }

    /// A redacted view safe for `--list-config` / startup logging.
    pub fn describe(&self) -> String {
        format!(
            "port={} language={} stt_streaming={} stt_endpoint={} tts_endpoint={} tts_voice_id={} llm_endpoint={} llm_model={} timing={:?}",
            self.port,
            self.language_code,
            self.stt_streaming,
            self.stt_endpoint,
            self.tts_endpoint,
            self.tts_voice_id,
            self.llm_endpoint,
            self.llm_model,
            self.timing,
        )
    }
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingField(key.to_string()))
}

fn load_toml_overlay(path: Option<&str>) -> Result<TomlOverlay, ConfigError> {
    let path = path.unwrap_or("config.toml");
    if !std::path::Path::new(path).exists() {
        return Ok(TomlOverlay::default());
    }
    let builder = config::Config::builder().add_source(config::File::with_name(path));
    let built = builder.build().map_err(ConfigError::Parse)?;
    built.try_deserialize().map_err(ConfigError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_defaults_are_nonzero() {
        assert!(TimingConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timing_value_is_rejected() {
        let mut timing = TimingConfig::default();
        timing.post_playback_mute_ms = 0;
        assert!(timing.validate().is_err());
    }

    #[test]
    fn missing_credential_env_is_reported_by_name() {
        std::env::remove_var("DOLORES_STT_CREDENTIAL_TEST_PROBE");
        let err = required_env("DOLORES_STT_CREDENTIAL_TEST_PROBE").unwrap_err();
        match err {
            ConfigError::MissingField(field) => {
                assert_eq!(field, "DOLORES_STT_CREDENTIAL_TEST_PROBE")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
