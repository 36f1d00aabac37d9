//! Common utilities for integration tests

use std::sync::Arc;

use axum::Router;
use narration_core::{
    AutoplayPolicy, Bytes, NarrationError, Narrator, NullOutput, SpeechSynthesizer,
    SynthesizedAudio,
};
use server::config::ServerConfig;
use server::routes::{build_router, AppState};

/// Speech backend that answers instantly with fake compressed audio, so
/// tests never touch the network or the transcoder.
pub struct StaticSynth {
    pub fail: bool,
}

#[async_trait::async_trait]
impl SpeechSynthesizer for StaticSynth {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, NarrationError> {
        if self.fail {
            return Err(NarrationError::Service {
                status: 503,
                message: "voice service unavailable".to_string(),
            });
        }
        Ok(SynthesizedAudio {
            data: Bytes::from(format!("mpeg:{text}")),
            mime_type: "audio/mpeg".to_string(),
        })
    }
}

/// Create a test app instance backed by mocks
pub fn create_test_app() -> Router {
    create_test_app_with(StaticSynth { fail: false })
}

pub fn create_test_app_with(synth: StaticSynth) -> Router {
    let narrator = Arc::new(Narrator::new(
        Arc::new(synth),
        Arc::new(NullOutput),
        AutoplayPolicy::default(),
    ));
    let state = AppState::new(narrator, ServerConfig::default());
    build_router(state)
}
