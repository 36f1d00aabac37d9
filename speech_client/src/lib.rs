use std::env;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use narration_core::{NarrationError, SpeechSynthesizer, SynthesizedAudio};
use rand::seq::SliceRandom;
use reqwest::header;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

pub const DEFAULT_VOICEVOX_BASE_URL: &str = "https://deprecatedapis.tts.quest/v2";
pub const DEFAULT_ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";

const DEFAULT_VOICEVOX_SPEAKER: u32 = 2;
const DEFAULT_ELEVENLABS_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";
const DEFAULT_ELEVENLABS_MODEL: &str = "eleven_multilingual_v2";

/// Longest service error body worth keeping in a log line.
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechProvider {
    Voicevox,
    ElevenLabs,
}

impl SpeechProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            SpeechProvider::Voicevox => "voicevox",
            SpeechProvider::ElevenLabs => "elevenlabs",
        }
    }
}

impl FromStr for SpeechProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "voicevox" => Ok(SpeechProvider::Voicevox),
            "elevenlabs" => Ok(SpeechProvider::ElevenLabs),
            other => bail!("unknown speech provider: {other}"),
        }
    }
}

/// Connection settings for one speech service, read from the environment.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub provider: SpeechProvider,
    pub api_keys: Vec<String>,
    pub base_url: String,
    pub voicevox_speaker: u32,
    pub elevenlabs_voice_id: String,
    pub elevenlabs_model_id: String,
}

impl SpeechConfig {
    /// Load from the environment. `SPEECH_API_KEYS` is a comma-separated
    /// pool; everything else has a working default.
    pub fn from_env() -> Result<Self> {
        let provider = env::var("SPEECH_PROVIDER")
            .unwrap_or_else(|_| "voicevox".to_string())
            .parse::<SpeechProvider>()?;

        let api_keys: Vec<String> = env::var("SPEECH_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(String::from)
            .collect();
        if api_keys.is_empty() {
            bail!("SPEECH_API_KEYS must list at least one key");
        }

        let base_url = env::var("SPEECH_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| {
                match provider {
                    SpeechProvider::Voicevox => DEFAULT_VOICEVOX_BASE_URL,
                    SpeechProvider::ElevenLabs => DEFAULT_ELEVENLABS_BASE_URL,
                }
                .to_string()
            });

        let voicevox_speaker = env::var("VOICEVOX_SPEAKER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_VOICEVOX_SPEAKER);

        let elevenlabs_voice_id = env::var("ELEVENLABS_VOICE_ID")
            .unwrap_or_else(|_| DEFAULT_ELEVENLABS_VOICE.to_string());
        let elevenlabs_model_id = env::var("ELEVENLABS_MODEL_ID")
            .unwrap_or_else(|_| DEFAULT_ELEVENLABS_MODEL.to_string());

        Ok(Self {
            provider,
            api_keys,
            base_url,
            voicevox_speaker,
            elevenlabs_voice_id,
            elevenlabs_model_id,
        })
    }
}

#[derive(Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// HTTP client for one speech service, holding a single key picked from the
/// configured pool.
pub struct SpeechClient {
    client: Client,
    provider: SpeechProvider,
    api_key: String,
    base_url: String,
    voicevox_speaker: u32,
    elevenlabs_voice_id: String,
    elevenlabs_model_id: String,
}

impl SpeechClient {
    /// Build a client from config, choosing one key from the pool at random
    /// so repeated sessions spread load across keys.
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        let api_key = config
            .api_keys
            .choose(&mut rand::thread_rng())
            .context("no API keys configured")?
            .clone();
        Ok(Self {
            client: Client::new(),
            provider: config.provider,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            voicevox_speaker: config.voicevox_speaker,
            elevenlabs_voice_id: config.elevenlabs_voice_id.clone(),
            elevenlabs_model_id: config.elevenlabs_model_id.clone(),
        })
    }

    /// Ask the service whether the selected key is valid.
    ///
    /// A reachable service that rejects the key is an error; an unreachable
    /// service or an unexpected response only logs a warning, since the key
    /// may still work for synthesis.
    pub async fn check_key(&self) -> Result<(), NarrationError> {
        if self.provider != SpeechProvider::Voicevox {
            return Ok(());
        }
        let url = format!("{}/api/", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("key probe skipped, speech service unreachable: {}", e);
                return Ok(());
            }
        };
        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("key probe returned an unexpected response: {}", e);
                return Ok(());
            }
        };
        if let Some(message) = body.get("errorMessage").and_then(|m| m.as_str()) {
            return Err(NarrationError::Service {
                status: 401,
                message: message.to_string(),
            });
        }
        Ok(())
    }

    async fn fetch_voicevox(&self, text: &str) -> Result<SynthesizedAudio, NarrationError> {
        let url = format!("{}/voicevox/audio/", self.base_url);
        let speaker = self.voicevox_speaker.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("speaker", speaker.as_str()),
                ("pitch", "0"),
                ("intonationScale", "1"),
                ("speed", "1"),
                ("text", text),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        read_audio(response, "audio/wav").await
    }

    async fn fetch_elevenlabs(&self, text: &str) -> Result<SynthesizedAudio, NarrationError> {
        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.base_url, self.elevenlabs_voice_id
        );
        let body = ElevenLabsRequest {
            text,
            model_id: &self.elevenlabs_model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.5,
            },
        };
        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header(header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        read_audio(response, "audio/mpeg").await
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechClient {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, NarrationError> {
        debug!(
            "requesting {} synthesis for {} chars",
            self.provider.as_str(),
            text.chars().count()
        );
        match self.provider {
            SpeechProvider::Voicevox => self.fetch_voicevox(text).await,
            SpeechProvider::ElevenLabs => self.fetch_elevenlabs(text).await,
        }
    }
}

/// Turn a response into audio, mapping HTTP failures and JSON error bodies
/// into service errors.
async fn read_audio(
    response: reqwest::Response,
    default_mime: &str,
) -> Result<SynthesizedAudio, NarrationError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(NarrationError::Service {
            status: status.as_u16(),
            message: short_body(&message),
        });
    }

    let mime_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(default_mime)
        .to_string();
    let data = response.bytes().await.map_err(transport_error)?;

    // Some services report errors as JSON with a 200 status.
    if mime_type.contains("json") {
        let message = serde_json::from_slice::<serde_json::Value>(&data)
            .ok()
            .and_then(|body| {
                body.get("errorMessage")
                    .and_then(|m| m.as_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| short_body(&String::from_utf8_lossy(&data)));
        return Err(NarrationError::Service {
            status: status.as_u16(),
            message,
        });
    }

    if data.is_empty() {
        return Err(NarrationError::Service {
            status: status.as_u16(),
            message: "service returned an empty audio body".to_string(),
        });
    }

    Ok(SynthesizedAudio { data, mime_type })
}

fn transport_error(e: reqwest::Error) -> NarrationError {
    let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
    NarrationError::Service {
        status,
        message: e.to_string(),
    }
}

fn short_body(body: &str) -> String {
    let trimmed = body.trim();
    let mut shortened: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        shortened.push('…');
    }
    shortened
}
