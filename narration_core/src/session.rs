//! Session tracking: which card content and side are currently live, which
//! playback handle is active, and which in-flight synthesis can still be
//! cancelled. Every asynchronous continuation in the pipeline consults this
//! tracker before touching shared state, so a slow superseded render can
//! never resurrect stale audio.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::card::{ContentKey, Side};
use crate::playback::PlaybackHandle;

/// How the current render relates to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Different content key than before (includes the very first render).
    NewContent,
    /// Same key, front face was showing and the back is now revealed.
    FlippedToBack,
    /// Same key, back face was showing and the front is showing again.
    FlippedToFront,
    /// Same key, same side. Idempotent re-render; nothing to do.
    Unchanged,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::NewContent => "new_content",
            Transition::FlippedToBack => "flipped_to_back",
            Transition::FlippedToFront => "flipped_to_front",
            Transition::Unchanged => "unchanged",
        }
    }
}

/// Proof of which render an asynchronous continuation belongs to.
///
/// Minted by [`SessionTracker::begin_render`] and compared by identity: the
/// epoch disambiguates two visits to the same card face, so an old token for
/// "dog / front" goes stale the moment a newer render of "dog / front"
/// begins, even though key and side match.
#[derive(Debug, Clone)]
pub struct RenderToken {
    key: ContentKey,
    side: Side,
    epoch: u64,
}

impl RenderToken {
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    pub fn side(&self) -> Side {
        self.side
    }
}

#[derive(Default)]
struct ActiveState {
    key: Option<ContentKey>,
    side: Option<Side>,
    epoch: u64,
    handle: Option<PlaybackHandle>,
    cancel: Option<CancellationToken>,
}

impl ActiveState {
    fn matches(&self, token: &RenderToken) -> bool {
        self.epoch == token.epoch
            && self.side == Some(token.side)
            && self.key.as_ref() == Some(&token.key)
    }
}

/// Single source of truth for the audio session.
///
/// All mutation goes through the transition operations here; the pipeline
/// and the playback controller only ever request changes, they never write
/// fields themselves. Methods take `&self` and the state sits behind a
/// mutex that is never held across an await.
#[derive(Default)]
pub struct SessionTracker {
    state: Mutex<ActiveState>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ActiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a render event and classify it against the previous state.
    ///
    /// On any transition other than `Unchanged` this atomically swaps the
    /// session to the new identity: the active handle is stopped and
    /// released, the active cancellation token is cancelled, and a fresh
    /// token is minted for the new render. On `Unchanged` nothing mutates
    /// and the caller is expected to skip re-initialization entirely.
    pub fn begin_render(&self, key: ContentKey, side: Side) -> (RenderToken, Transition) {
        let (token, transition, stopped) = {
            let mut state = self.lock();
            let transition = match (state.key.as_ref(), state.side) {
                (Some(prev_key), Some(prev_side)) if *prev_key == key => {
                    match (prev_side, side) {
                        (Side::Front, Side::Back) => Transition::FlippedToBack,
                        (Side::Back, Side::Front) => Transition::FlippedToFront,
                        _ => Transition::Unchanged,
                    }
                }
                _ => Transition::NewContent,
            };

            let stopped = if transition == Transition::Unchanged {
                None
            } else {
                if let Some(cancel) = state.cancel.take() {
                    cancel.cancel();
                }
                state.key = Some(key.clone());
                state.side = Some(side);
                state.epoch += 1;
                state.cancel = Some(CancellationToken::new());
                state.handle.take()
            };

            let token = RenderToken {
                key,
                side,
                epoch: state.epoch,
            };
            (token, transition, stopped)
        };

        // Stopping the displaced audio happens outside the state lock; the
        // handle has its own interior lock.
        if let Some(handle) = stopped {
            handle.halt();
        }

        debug!(
            "render transition {} on {} side for {}",
            transition.as_str(),
            side.as_str(),
            token.key.preview()
        );
        (token, transition)
    }

    /// Is this token's render still the one currently shown?
    pub fn is_live(&self, token: &RenderToken) -> bool {
        self.lock().matches(token)
    }

    /// Clone of the cancellation token for a live render. A stale token gets
    /// nothing, which callers treat the same as already-cancelled.
    pub fn cancel_handle(&self, token: &RenderToken) -> Option<CancellationToken> {
        let state = self.lock();
        if state.matches(token) {
            state.cancel.clone()
        } else {
            None
        }
    }

    /// Install a freshly built handle as the active one. Only permitted
    /// while the token is live; otherwise nothing happens and the caller
    /// keeps ownership of the handle it tried to install.
    ///
    /// Returns the displaced handle (if any) so the caller can stop it, or
    /// an error when the render has gone stale.
    pub fn adopt(
        &self,
        token: &RenderToken,
        handle: &PlaybackHandle,
    ) -> Result<Option<PlaybackHandle>, crate::error::NarrationError> {
        let mut state = self.lock();
        if !state.matches(token) {
            return Err(crate::error::NarrationError::Cancelled);
        }
        Ok(state.handle.replace(handle.clone()))
    }

    /// Drop the active handle if it is the given one (stop path).
    pub fn release(&self, handle: &PlaybackHandle) {
        let mut state = self.lock();
        if state.handle.as_ref().is_some_and(|h| h.same_as(handle)) {
            state.handle = None;
        }
    }

    pub fn active_side(&self) -> Option<Side> {
        self.lock().side
    }

    pub fn has_active_audio(&self) -> bool {
        self.lock().handle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ContentKey {
        ContentKey::derive(&[Some(s), None, None]).unwrap()
    }

    #[test]
    fn first_render_is_new_content() {
        let tracker = SessionTracker::new();
        let (_, transition) = tracker.begin_render(key("dog"), Side::Front);
        assert_eq!(transition, Transition::NewContent);
    }

    #[test]
    fn transition_table_is_exact() {
        let tracker = SessionTracker::new();
        tracker.begin_render(key("dog"), Side::Front);

        let (_, t) = tracker.begin_render(key("dog"), Side::Front);
        assert_eq!(t, Transition::Unchanged);

        let (_, t) = tracker.begin_render(key("dog"), Side::Back);
        assert_eq!(t, Transition::FlippedToBack);

        let (_, t) = tracker.begin_render(key("dog"), Side::Back);
        assert_eq!(t, Transition::Unchanged);

        let (_, t) = tracker.begin_render(key("dog"), Side::Front);
        assert_eq!(t, Transition::FlippedToFront);

        let (_, t) = tracker.begin_render(key("cat"), Side::Front);
        assert_eq!(t, Transition::NewContent);
    }

    #[test]
    fn token_stays_live_until_superseded() {
        let tracker = SessionTracker::new();
        let (token, _) = tracker.begin_render(key("dog"), Side::Front);
        assert!(tracker.is_live(&token));

        tracker.begin_render(key("cat"), Side::Front);
        assert!(!tracker.is_live(&token));
    }

    #[test]
    fn revisiting_a_card_does_not_revive_its_old_token() {
        let tracker = SessionTracker::new();
        let (old_dog, _) = tracker.begin_render(key("dog"), Side::Front);
        tracker.begin_render(key("cat"), Side::Front);
        let (new_dog, _) = tracker.begin_render(key("dog"), Side::Front);

        // Same key and side, but only the most recently issued token lives.
        assert!(tracker.is_live(&new_dog));
        assert!(!tracker.is_live(&old_dog));
    }

    #[test]
    fn unchanged_render_mutates_nothing() {
        let tracker = SessionTracker::new();
        let (first, _) = tracker.begin_render(key("dog"), Side::Front);
        let cancel = tracker.cancel_handle(&first).unwrap();

        let (second, t) = tracker.begin_render(key("dog"), Side::Front);
        assert_eq!(t, Transition::Unchanged);
        assert!(!cancel.is_cancelled());
        // Both tokens denote the same live render.
        assert!(tracker.is_live(&first));
        assert!(tracker.is_live(&second));
    }

    #[test]
    fn superseding_render_cancels_the_previous_token() {
        let tracker = SessionTracker::new();
        let (first, _) = tracker.begin_render(key("dog"), Side::Front);
        let cancel = tracker.cancel_handle(&first).unwrap();
        assert!(!cancel.is_cancelled());

        tracker.begin_render(key("dog"), Side::Back);
        assert!(cancel.is_cancelled());
        assert!(tracker.cancel_handle(&first).is_none());
    }
}
