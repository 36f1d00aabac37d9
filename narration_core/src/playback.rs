//! Playback handles and audio device output.
//!
//! At most one narration is audible at a time. A [`PlaybackHandle`] pairs the
//! encoded audio with the render token that produced it, so every play and
//! stop request can be checked against the session before touching the
//! device. The actual device sits behind [`AudioOutput`], which keeps the
//! rest of the pipeline testable without a sound card.

use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tracing::debug;

use crate::audio::AudioPayload;
use crate::error::NarrationError;
use crate::session::{RenderToken, SessionTracker};

/// A sound device that can start playing an encoded payload.
pub trait AudioOutput: Send + Sync {
    fn start(&self, payload: &AudioPayload) -> Result<Box<dyn ActiveVoice>, NarrationError>;
}

/// One in-progress playback on the device. Stopping is idempotent.
pub trait ActiveVoice: Send {
    fn stop(&self);
    fn is_finished(&self) -> bool;
}

struct HandleInner {
    payload: AudioPayload,
    token: RenderToken,
    voice: Mutex<Option<Box<dyn ActiveVoice>>>,
}

/// Shared reference to one render's audio. Clones point at the same playback
/// slot, so halting any clone silences them all.
#[derive(Clone)]
pub struct PlaybackHandle {
    inner: Arc<HandleInner>,
}

impl PlaybackHandle {
    pub fn new(payload: AudioPayload, token: RenderToken) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                payload,
                token,
                voice: Mutex::new(None),
            }),
        }
    }

    pub fn payload(&self) -> &AudioPayload {
        &self.inner.payload
    }

    pub fn token(&self) -> &RenderToken {
        &self.inner.token
    }

    /// Whether this handle and `other` share the same playback slot.
    pub fn same_as(&self, other: &PlaybackHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stop whatever this handle is voicing. Safe to call when idle.
    pub fn halt(&self) {
        let voice = self
            .inner
            .voice
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(voice) = voice {
            voice.stop();
        }
    }

    /// Install a freshly started voice, silencing any previous one.
    fn set_voice(&self, voice: Box<dyn ActiveVoice>) {
        let previous = self
            .inner
            .voice
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(voice);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.inner
            .voice
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|voice| !voice.is_finished())
    }
}

impl fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("key", &self.inner.token.key().preview())
            .field("playing", &self.is_playing())
            .finish()
    }
}

/// Drives the single playback slot against the session's liveness rules.
pub struct PlaybackController {
    output: Arc<dyn AudioOutput>,
}

impl PlaybackController {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self { output }
    }

    pub fn create_handle(&self, payload: AudioPayload, token: RenderToken) -> PlaybackHandle {
        PlaybackHandle::new(payload, token)
    }

    /// Start (or restart) the handle's audio from the beginning.
    ///
    /// Refuses with [`NarrationError::Cancelled`] when the handle's render has
    /// been superseded; a stale handle must never become audible.
    pub fn play(
        &self,
        session: &SessionTracker,
        handle: &PlaybackHandle,
    ) -> Result<(), NarrationError> {
        if !session.is_live(handle.token()) {
            return Err(NarrationError::Cancelled);
        }
        let displaced = session.adopt(handle.token(), handle)?;
        if let Some(displaced) = displaced {
            if !displaced.same_as(handle) {
                displaced.halt();
            }
        }

        // A second play of the same handle restarts from the beginning.
        handle.halt();

        debug!("starting playback for {}", handle.token().key().preview());
        match self.output.start(handle.payload()) {
            Ok(voice) => {
                handle.set_voice(voice);
                Ok(())
            }
            Err(e) => {
                session.release(handle);
                Err(e)
            }
        }
    }

    /// Silence the handle and release the session's playback slot.
    pub fn stop(&self, session: &SessionTracker, handle: &PlaybackHandle) {
        debug!("stopping playback for {}", handle.token().key().preview());
        handle.halt();
        session.release(handle);
    }
}

/// Real device output backed by rodio.
///
/// [`OutputStream`] is not `Send`, so [`RodioOutput::open`] hands it back to
/// the caller to keep alive on the opening thread while the handle itself is
/// freely shared.
pub struct RodioOutput {
    handle: OutputStreamHandle,
}

impl RodioOutput {
    pub fn open() -> Result<(Self, OutputStream), NarrationError> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| NarrationError::Output(e.to_string()))?;
        Ok((Self { handle }, stream))
    }
}

impl AudioOutput for RodioOutput {
    fn start(&self, payload: &AudioPayload) -> Result<Box<dyn ActiveVoice>, NarrationError> {
        let sink =
            Sink::try_new(&self.handle).map_err(|e| NarrationError::Output(e.to_string()))?;
        let source = Decoder::new(Cursor::new(payload.data.clone()))
            .map_err(|e| NarrationError::Output(e.to_string()))?;
        sink.append(source);
        Ok(Box::new(RodioVoice { sink }))
    }
}

struct RodioVoice {
    sink: Sink,
}

impl ActiveVoice for RodioVoice {
    fn stop(&self) {
        self.sink.stop();
    }

    fn is_finished(&self) -> bool {
        self.sink.empty()
    }
}

/// Silent output for headless environments. Play requests succeed and finish
/// immediately, so session bookkeeping stays exercised without a device.
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn start(&self, _payload: &AudioPayload) -> Result<Box<dyn ActiveVoice>, NarrationError> {
        Ok(Box::new(NullVoice))
    }
}

struct NullVoice;

impl ActiveVoice for NullVoice {
    fn stop(&self) {}

    fn is_finished(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::ContentKey;
    use crate::session::Transition;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    struct RecordingOutput {
        events: Arc<StdMutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl RecordingOutput {
        fn new() -> (Arc<Self>, Arc<StdMutex<Vec<&'static str>>>) {
            let events = Arc::new(StdMutex::new(Vec::new()));
            let output = Arc::new(Self {
                events: events.clone(),
                fail: false,
            });
            (output, events)
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                events: Arc::new(StdMutex::new(Vec::new())),
                fail: true,
            })
        }
    }

    impl AudioOutput for RecordingOutput {
        fn start(&self, _payload: &AudioPayload) -> Result<Box<dyn ActiveVoice>, NarrationError> {
            if self.fail {
                return Err(NarrationError::Output("no device".into()));
            }
            self.events.lock().unwrap().push("start");
            Ok(Box::new(RecordingVoice {
                events: self.events.clone(),
                stopped: AtomicBool::new(false),
            }))
        }
    }

    struct RecordingVoice {
        events: Arc<StdMutex<Vec<&'static str>>>,
        stopped: AtomicBool,
    }

    impl ActiveVoice for RecordingVoice {
        fn stop(&self) {
            if !self.stopped.swap(true, Ordering::SeqCst) {
                self.events.lock().unwrap().push("stop");
            }
        }

        fn is_finished(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    fn payload() -> AudioPayload {
        AudioPayload {
            data: Bytes::from_static(b"mp3-bytes"),
            mime_type: "audio/mpeg".into(),
        }
    }

    fn key(text: &str) -> ContentKey {
        ContentKey::derive(&[Some(text), None, None]).unwrap()
    }

    #[test]
    fn play_starts_audio_and_adopts_the_slot() {
        let session = SessionTracker::default();
        let (output, events) = RecordingOutput::new();
        let controller = PlaybackController::new(output);

        let (token, transition) = session.begin_render(key("hello"), crate::card::Side::Front);
        assert_eq!(transition, Transition::NewContent);

        let handle = controller.create_handle(payload(), token);
        controller.play(&session, &handle).unwrap();

        assert!(handle.is_playing());
        assert!(session.has_active_audio());
        assert_eq!(*events.lock().unwrap(), vec!["start"]);
    }

    #[test]
    fn replay_restarts_from_the_beginning() {
        let session = SessionTracker::default();
        let (output, events) = RecordingOutput::new();
        let controller = PlaybackController::new(output);

        let (token, _) = session.begin_render(key("hello"), crate::card::Side::Front);
        let handle = controller.create_handle(payload(), token);

        controller.play(&session, &handle).unwrap();
        controller.play(&session, &handle).unwrap();

        assert_eq!(*events.lock().unwrap(), vec!["start", "stop", "start"]);
        assert!(handle.is_playing());
    }

    #[test]
    fn superseded_handle_refuses_to_play() {
        let session = SessionTracker::default();
        let (output, events) = RecordingOutput::new();
        let controller = PlaybackController::new(output);

        let (old_token, _) = session.begin_render(key("first"), crate::card::Side::Front);
        let stale = controller.create_handle(payload(), old_token);

        session.begin_render(key("second"), crate::card::Side::Front);

        let err = controller.play(&session, &stale).unwrap_err();
        assert!(err.is_cancelled());
        assert!(events.lock().unwrap().is_empty());
        assert!(!session.has_active_audio());
    }

    #[test]
    fn stop_silences_and_releases_the_slot() {
        let session = SessionTracker::default();
        let (output, events) = RecordingOutput::new();
        let controller = PlaybackController::new(output);

        let (token, _) = session.begin_render(key("hello"), crate::card::Side::Front);
        let handle = controller.create_handle(payload(), token);
        controller.play(&session, &handle).unwrap();

        controller.stop(&session, &handle);

        assert!(!handle.is_playing());
        assert!(!session.has_active_audio());
        assert_eq!(*events.lock().unwrap(), vec!["start", "stop"]);
    }

    #[test]
    fn output_failure_releases_the_slot() {
        let session = SessionTracker::default();
        let controller = PlaybackController::new(RecordingOutput::failing());

        let (token, _) = session.begin_render(key("hello"), crate::card::Side::Front);
        let handle = controller.create_handle(payload(), token);

        let err = controller.play(&session, &handle).unwrap_err();
        assert!(matches!(err, NarrationError::Output(_)));
        assert!(!session.has_active_audio());
    }

    #[test]
    fn null_output_plays_silently() {
        let session = SessionTracker::default();
        let controller = PlaybackController::new(Arc::new(NullOutput));

        let (token, _) = session.begin_render(key("hello"), crate::card::Side::Front);
        let handle = controller.create_handle(payload(), token);
        controller.play(&session, &handle).unwrap();

        // The null voice reports finished immediately.
        assert!(!handle.is_playing());
        assert!(session.has_active_audio());
    }

    #[test]
    fn clones_share_one_slot() {
        let session = SessionTracker::default();
        let (token, _) = session.begin_render(key("hello"), crate::card::Side::Front);
        let handle = PlaybackHandle::new(payload(), token.clone());
        let clone = handle.clone();

        assert!(handle.same_as(&clone));
        assert!(!handle.same_as(&PlaybackHandle::new(payload(), token)));
    }
}
