use thiserror::Error;

/// Errors raised by the narration pipeline.
///
/// `Cancelled` is control flow, not a fault: it means a newer render
/// superseded the one that was running. Callers are expected to discard the
/// work silently; nothing that carries `Cancelled` may be cached, adopted or
/// logged at error level.
#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("card has no speakable text")]
    EmptyContent,

    #[error("speech service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("could not decode synthesized audio: {0}")]
    Decode(String),

    #[error("could not encode narration audio: {0}")]
    Encode(String),

    #[error("audio output error: {0}")]
    Output(String),

    #[error("narration superseded")]
    Cancelled,
}

impl NarrationError {
    /// True for the expected control-flow signal (stale render or cancel).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NarrationError::Cancelled)
    }
}
