//! Autoplay decision rules.

use crate::card::Side;
use crate::session::Transition;

/// The marker card authors put in front text to keep it from being read
/// aloud before the answer is revealed.
pub const DEFAULT_MUTE_MARKER: &str = ",\"";

/// Decides whether playback starts automatically after a render.
///
/// Pure: the same (transition, side, text) always yields the same answer.
#[derive(Debug, Clone)]
pub struct AutoplayPolicy {
    enabled: bool,
    mute_markers: Vec<String>,
}

impl Default for AutoplayPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            mute_markers: vec![DEFAULT_MUTE_MARKER.to_string()],
        }
    }
}

impl AutoplayPolicy {
    pub fn new(enabled: bool, mute_markers: Vec<String>) -> Self {
        Self { enabled, mute_markers }
    }

    /// Autoplay table:
    /// - new content on the front: yes, unless a mute marker appears in the
    ///   text;
    /// - new content on the back, or flipping to the back: always yes
    ///   (revealing the answer always narrates);
    /// - flipping back to the front, or an unchanged re-render: never.
    pub fn should_autoplay(&self, transition: Transition, side: Side, text: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match (transition, side) {
            (Transition::NewContent, Side::Front) => !self.is_muted(text),
            (Transition::NewContent, Side::Back) | (Transition::FlippedToBack, _) => true,
            (Transition::FlippedToFront, _) | (Transition::Unchanged, _) => false,
        }
    }

    fn is_muted(&self, text: &str) -> bool {
        self.mute_markers.iter().any(|marker| text.contains(marker))
    }
}
