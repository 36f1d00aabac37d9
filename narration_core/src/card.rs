//! Card identity: which text is visible, which face is showing, and the
//! stable key that names "what should be spoken" for caching and liveness.

use serde::{Deserialize, Serialize};

use crate::error::NarrationError;

/// Separator between card fields inside a [`ContentKey`]. An ASCII control
/// character never survives in rendered card text, so joined keys cannot
/// collide across field boundaries.
const FIELD_SEPARATOR: char = '\u{1F}';

/// Which face of the card is currently displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Front => "front",
            Side::Back => "back",
        }
    }
}

/// Deterministic identity for the speakable content of one render.
///
/// Derived from the visible text fields in a fixed order; two renders of the
/// same card face always produce equal keys, and any field change produces a
/// different key. The side is deliberately not part of the key: the key names
/// what is spoken, the side only steers autoplay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey(String);

impl ContentKey {
    /// Derive a key from the ordered field sequence. The first field (front
    /// text) is mandatory; a blank or absent front means there is nothing to
    /// narrate and the whole render must be skipped.
    pub fn derive(fields: &[Option<&str>]) -> Result<Self, NarrationError> {
        let cleaned: Vec<String> = fields.iter().map(|f| clean_field(f.unwrap_or(""))).collect();
        match cleaned.first() {
            Some(front) if !front.is_empty() => {}
            _ => return Err(NarrationError::EmptyContent),
        }
        Ok(ContentKey(cleaned.join(&FIELD_SEPARATOR.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, separator-free form for log lines.
    pub fn preview(&self) -> String {
        let flat: String = self
            .0
            .chars()
            .map(|c| if c == FIELD_SEPARATOR { '|' } else { c })
            .take(48)
            .collect();
        if self.0.chars().count() > 48 {
            format!("{flat}…")
        } else {
            flat
        }
    }
}

fn clean_field(s: &str) -> String {
    s.trim().replace(FIELD_SEPARATOR, "")
}

/// The text a card render posts to the service: one entry per visible
/// region. `back` carries the back region's text when the back side is
/// showing; its presence is the structural front/back marker, it is not part
/// of the spoken text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderSnapshot {
    #[serde(default)]
    pub front: Option<String>,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub back: Option<String>,
}

impl RenderSnapshot {
    pub fn side(&self) -> Side {
        if self.back.is_some() {
            Side::Back
        } else {
            Side::Front
        }
    }

    /// The speakable fields in key order: front, example, definition.
    pub fn speech_fields(&self) -> [Option<&str>; 3] {
        [
            self.front.as_deref(),
            self.example.as_deref(),
            self.definition.as_deref(),
        ]
    }

    /// Everything that gets narrated, joined with sentence pauses.
    pub fn spoken_text(&self) -> String {
        spoken_text(&self.speech_fields())
    }
}

/// Join the non-empty fields with ". " so the voice pauses between them.
pub fn spoken_text(fields: &[Option<&str>]) -> String {
    fields
        .iter()
        .filter_map(|f| {
            let t = f.unwrap_or("").trim();
            (!t.is_empty()).then_some(t)
        })
        .collect::<Vec<_>>()
        .join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = ContentKey::derive(&[Some("dog"), Some("a dog runs"), None]).unwrap();
        let b = ContentKey::derive(&[Some("dog"), Some("a dog runs"), None]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derive_trims_fields() {
        let a = ContentKey::derive(&[Some("  dog "), None, None]).unwrap();
        let b = ContentKey::derive(&[Some("dog"), None, None]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn any_field_change_changes_the_key() {
        let front_only = ContentKey::derive(&[Some("dog"), None, None]).unwrap();
        let with_def = ContentKey::derive(&[Some("dog"), None, Some("canine")]).unwrap();
        assert_ne!(front_only, with_def);
    }

    #[test]
    fn field_boundaries_cannot_collide() {
        let split = ContentKey::derive(&[Some("do"), Some("g"), None]).unwrap();
        let joined = ContentKey::derive(&[Some("dog"), None, None]).unwrap();
        assert_ne!(split, joined);
    }

    #[test]
    fn blank_front_is_empty_content() {
        let err = ContentKey::derive(&[Some("   "), Some("example"), None]).unwrap_err();
        assert!(matches!(err, NarrationError::EmptyContent));
        let err = ContentKey::derive(&[None, Some("example"), None]).unwrap_err();
        assert!(matches!(err, NarrationError::EmptyContent));
    }

    #[test]
    fn separator_is_stripped_from_field_text() {
        let sneaky = format!("do{}g", '\u{1F}');
        let a = ContentKey::derive(&[Some(&sneaky), None, None]).unwrap();
        let b = ContentKey::derive(&[Some("dog"), None, None]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn side_follows_back_region_presence() {
        let front = RenderSnapshot {
            front: Some("dog".into()),
            ..Default::default()
        };
        assert_eq!(front.side(), Side::Front);

        let back = RenderSnapshot {
            front: Some("dog".into()),
            definition: Some("a canine".into()),
            back: Some("a canine".into()),
            ..Default::default()
        };
        assert_eq!(back.side(), Side::Back);
    }

    #[test]
    fn spoken_text_joins_present_fields() {
        let snapshot = RenderSnapshot {
            front: Some("dog".into()),
            example: Some("the dog barks".into()),
            definition: None,
            back: None,
        };
        assert_eq!(snapshot.spoken_text(), "dog. the dog barks");
    }

    #[test]
    fn spoken_text_skips_blank_fields() {
        assert_eq!(spoken_text(&[Some("dog"), Some("  "), Some("canine")]), "dog. canine");
    }
}
