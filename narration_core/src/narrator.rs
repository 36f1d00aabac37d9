//! The render pipeline: classify, synthesize, transcode, cache, play.
//!
//! [`Narrator`] owns one session worth of narration state. Every card render
//! flows through [`Narrator::handle_render`], which decides whether audio is
//! needed, fetches and transcodes it off the async runtime, and hands back a
//! playback handle tied to that render. Supersession is silent: a render that
//! lost its claim produces no audio, no cache entry, and no error log above
//! debug level.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{self, AudioPayload, MIME_MPEG};
use crate::cache::AudioCache;
use crate::card::{ContentKey, RenderSnapshot, Side};
use crate::error::NarrationError;
use crate::playback::{AudioOutput, PlaybackController, PlaybackHandle};
use crate::policy::AutoplayPolicy;
use crate::session::{RenderToken, SessionTracker, Transition};

/// Raw audio as returned by a speech service, before any transcoding.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub data: Bytes,
    pub mime_type: String,
}

/// A text-to-speech backend. Implementations are expected to be cheap to
/// call concurrently; the narrator serializes per-session work itself.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, NarrationError>;
}

/// What one render request amounted to.
#[derive(Debug)]
pub enum RenderOutcome {
    /// The card had no speakable text; session state was left untouched.
    NoSpeech,
    /// Same content and side as the active render; nothing changed.
    Unchanged,
    /// Audio is ready and the handle owns the playback slot.
    Ready {
        handle: PlaybackHandle,
        transition: Transition,
        autoplayed: bool,
        cached: bool,
    },
    /// A newer render claimed the session while this one was in flight.
    Superseded { transition: Transition },
    /// Synthesis or transcoding failed. The session still points at this
    /// render, so an identical follow-up render reports `Unchanged` rather
    /// than retrying.
    Failed {
        transition: Transition,
        error: NarrationError,
    },
}

/// One session's narration engine.
pub struct Narrator {
    session: SessionTracker,
    cache: AudioCache,
    policy: AutoplayPolicy,
    playback: PlaybackController,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl Narrator {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        policy: AutoplayPolicy,
    ) -> Self {
        Self {
            session: SessionTracker::new(),
            cache: AudioCache::new(),
            policy,
            playback: PlaybackController::new(output),
            synthesizer,
        }
    }

    /// Process one card render from front to finish.
    ///
    /// Any transition other than `Unchanged` first silences the previous
    /// render, then either reuses cached audio or runs the synthesis
    /// pipeline, and finally autoplays when policy allows it.
    pub async fn handle_render(&self, snapshot: &RenderSnapshot) -> RenderOutcome {
        let key = match ContentKey::derive(&snapshot.speech_fields()) {
            Ok(key) => key,
            Err(_) => {
                debug!("card has no speakable text, leaving session untouched");
                return RenderOutcome::NoSpeech;
            }
        };
        let side = snapshot.side();
        let text = snapshot.spoken_text();

        let (token, transition) = self.session.begin_render(key, side);
        if transition == Transition::Unchanged {
            return RenderOutcome::Unchanged;
        }

        let cancel = match self.session.cancel_handle(&token) {
            Some(cancel) => cancel,
            None => return RenderOutcome::Superseded { transition },
        };

        let cached = self.cache.get(token.key());
        let from_cache = cached.is_some();
        let payload = match cached {
            Some(payload) => {
                debug!("cache hit for {}", token.key().preview());
                payload
            }
            None => match self.synthesize(&token, &cancel, &text).await {
                Ok(payload) => payload,
                Err(e) if e.is_cancelled() => {
                    debug!("render superseded mid-flight for {}", token.key().preview());
                    return RenderOutcome::Superseded { transition };
                }
                Err(error) => {
                    warn!("synthesis failed for {}: {}", token.key().preview(), error);
                    return RenderOutcome::Failed { transition, error };
                }
            },
        };

        let handle = self.playback.create_handle(payload, token.clone());

        let autoplayed = if self.policy.should_autoplay(transition, side, &text) {
            match self.playback.play(&self.session, &handle) {
                Ok(()) => true,
                Err(e) if e.is_cancelled() => {
                    return RenderOutcome::Superseded { transition };
                }
                Err(e) => {
                    warn!("autoplay failed: {}", e);
                    false
                }
            }
        } else {
            false
        };

        RenderOutcome::Ready {
            handle,
            transition,
            autoplayed,
            cached: from_cache,
        }
    }

    /// Start or restart playback of a handle minted by an earlier render.
    pub fn play(&self, handle: &PlaybackHandle) -> Result<(), NarrationError> {
        self.playback.play(&self.session, handle)
    }

    /// Silence the handle and free the playback slot.
    pub fn stop(&self, handle: &PlaybackHandle) {
        self.playback.stop(&self.session, handle)
    }

    pub fn cache_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn active_side(&self) -> Option<Side> {
        self.session.active_side()
    }

    pub fn has_active_audio(&self) -> bool {
        self.session.has_active_audio()
    }

    /// Fetch and, when the service hands back raw WAV, transcode to MP3.
    ///
    /// Liveness is re-checked after every await point; a stale render bails
    /// out with `Cancelled` before its result can be cached.
    async fn synthesize(
        &self,
        token: &RenderToken,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<AudioPayload, NarrationError> {
        let started = Instant::now();
        self.checkpoint(token, cancel)?;

        let fetched = match self.synthesizer.synthesize(text).await {
            Ok(fetched) => fetched,
            Err(e) => {
                // A cancelled render reports as superseded even when the
                // fetch also failed.
                self.checkpoint(token, cancel)?;
                return Err(e);
            }
        };
        self.checkpoint(token, cancel)?;

        let payload = if audio::is_wav(&fetched.mime_type, &fetched.data) {
            let raw = fetched.data;
            let waveform = tokio::task::spawn_blocking(move || audio::decode_wav(&raw))
                .await
                .map_err(|e| NarrationError::Decode(e.to_string()))??;
            self.checkpoint(token, cancel)?;

            let mp3 = tokio::task::spawn_blocking(move || audio::encode_mp3(&waveform))
                .await
                .map_err(|e| NarrationError::Encode(e.to_string()))??;
            self.checkpoint(token, cancel)?;

            AudioPayload {
                data: Bytes::from(mp3),
                mime_type: MIME_MPEG.to_string(),
            }
        } else {
            AudioPayload {
                data: fetched.data,
                mime_type: fetched.mime_type,
            }
        };

        self.cache.put(token.key().clone(), payload.clone());
        info!(
            "synthesis pipeline completed in {}ms for {}",
            started.elapsed().as_millis(),
            token.key().preview()
        );
        Ok(payload)
    }

    fn checkpoint(
        &self,
        token: &RenderToken,
        cancel: &CancellationToken,
    ) -> Result<(), NarrationError> {
        if cancel.is_cancelled() || !self.session.is_live(token) {
            return Err(NarrationError::Cancelled);
        }
        Ok(())
    }
}
