//! Content-keyed cache of synthesized narration payloads.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::audio::AudioPayload;
use crate::card::ContentKey;

/// Process-lifetime cache mapping content keys to encoded audio.
///
/// Unbounded by design: entries are small (one narration clip per distinct
/// card face seen this session) and never expire, so revisiting a card is
/// always free. Writes are first-write-wins so the first successful
/// synthesis for a key stays authoritative.
#[derive(Debug, Default)]
pub struct AudioCache {
    entries: DashMap<ContentKey, AudioPayload>,
}

impl AudioCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ContentKey) -> Option<AudioPayload> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Store a payload for a key. A second `put` for the same key is a
    /// silent no-op; the stored value does not change.
    pub fn put(&self, key: ContentKey, payload: AudioPayload) {
        match self.entries.entry(key) {
            Entry::Occupied(_) => {}
            Entry::Vacant(vacant) => {
                debug!("caching narration payload ({} bytes)", payload.data.len());
                vacant.insert(payload);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
