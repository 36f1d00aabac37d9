// Configuration constants for the server

use std::time::Duration;

use narration_core::DEFAULT_MUTE_MARKER;

/// Where narration audio should go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioOutputMode {
    /// Use the default sound device, falling back to silent when none exists.
    Auto,
    /// Never open a device; playback state is tracked but inaudible.
    Off,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub max_text_length: usize,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub autoplay_enabled: bool,
    pub mute_markers: Vec<String>,
    pub audio_output: AudioOutputMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            request_timeout_secs: 60,
            max_text_length: 5000,
            cors_allowed_origins: None,
            autoplay_enabled: true,
            mute_markers: vec![DEFAULT_MUTE_MARKER.to_string()],
            audio_output: AudioOutputMode::Auto,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or(defaults.host);

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let request_timeout_secs = std::env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.request_timeout_secs);

        let max_text_length = std::env::var("MAX_TEXT_LENGTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_text_length);

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect()
            });

        let autoplay_enabled = std::env::var("NARRATE_AUTOPLAY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.autoplay_enabled);

        // Markers are ';'-separated because the default marker contains a
        // comma. An unset or all-empty list falls back to the default.
        let mute_markers = match std::env::var("NARRATE_MUTE_MARKERS") {
            Ok(value) => {
                let markers: Vec<String> = value
                    .split(';')
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect();
                if markers.is_empty() {
                    defaults.mute_markers
                } else {
                    markers
                }
            }
            Err(_) => defaults.mute_markers,
        };

        let audio_output = match std::env::var("AUDIO_OUTPUT")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            Ok("off") => AudioOutputMode::Off,
            _ => AudioOutputMode::Auto,
        };

        Self {
            host,
            port,
            request_timeout_secs,
            max_text_length,
            cors_allowed_origins,
            autoplay_enabled,
            mute_markers,
            audio_output,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
