pub mod audio;
pub mod cache;
pub mod card;
pub mod error;
pub mod narrator;
pub mod playback;
pub mod policy;
pub mod session;

pub use audio::{AudioPayload, Waveform, MIME_MPEG};
pub use cache::AudioCache;
pub use card::{ContentKey, RenderSnapshot, Side};
pub use error::NarrationError;
pub use narrator::{Narrator, RenderOutcome, SpeechSynthesizer, SynthesizedAudio};
pub use playback::{ActiveVoice, AudioOutput, NullOutput, PlaybackController, PlaybackHandle, RodioOutput};
pub use policy::{AutoplayPolicy, DEFAULT_MUTE_MARKER};
pub use session::{RenderToken, SessionTracker, Transition};

// Re-exported so synthesizer implementations and tests can build payloads
// without declaring the dependency themselves.
pub use bytes::Bytes;
