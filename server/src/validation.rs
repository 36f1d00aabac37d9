use narration_core::RenderSnapshot;

use crate::error::ApiError;

/// Maximum length of any single card field
const MAX_FIELD_LENGTH: usize = 2000;
/// Default cap on the combined text of one card; overridable via config
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 5000;

/// Validate a render request before it reaches the pipeline
///
/// A blank front is not an error here; the pipeline treats it as a card
/// with nothing to say.
pub fn validate_render_request(
    snapshot: &RenderSnapshot,
    max_text_length: usize,
) -> Result<(), ApiError> {
    let fields = [
        ("front", snapshot.front.as_deref()),
        ("example", snapshot.example.as_deref()),
        ("definition", snapshot.definition.as_deref()),
        ("back", snapshot.back.as_deref()),
    ];

    let mut total = 0usize;
    for (name, value) in fields {
        if let Some(value) = value {
            if value.len() > MAX_FIELD_LENGTH {
                return Err(ApiError::InvalidInput(format!(
                    "Field '{}' too long (max {} characters)",
                    name, MAX_FIELD_LENGTH
                )));
            }
            total += value.len();
        }
    }

    if total > max_text_length {
        return Err(ApiError::InvalidInput(format!(
            "Card text too long (max {} characters)",
            max_text_length
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(front: &str, back: Option<&str>) -> RenderSnapshot {
        RenderSnapshot {
            front: Some(front.to_string()),
            example: None,
            definition: None,
            back: back.map(str::to_string),
        }
    }

    #[test]
    fn test_validate_render_request_valid() {
        assert!(validate_render_request(&snapshot("perro", None), DEFAULT_MAX_TEXT_LENGTH).is_ok());
        assert!(
            validate_render_request(&snapshot("perro", Some("dog")), DEFAULT_MAX_TEXT_LENGTH)
                .is_ok()
        );
    }

    #[test]
    fn test_validate_render_request_blank_front_is_allowed() {
        let empty = RenderSnapshot {
            front: None,
            example: None,
            definition: None,
            back: None,
        };
        assert!(validate_render_request(&empty, DEFAULT_MAX_TEXT_LENGTH).is_ok());
    }

    #[test]
    fn test_validate_render_request_field_too_long() {
        let result =
            validate_render_request(&snapshot(&"a".repeat(3000), None), DEFAULT_MAX_TEXT_LENGTH);
        assert!(result.is_err());
        if let Err(ApiError::InvalidInput(msg)) = result {
            assert!(msg.contains("'front'"));
            assert!(msg.contains("too long"));
        }
    }

    #[test]
    fn test_validate_render_request_total_too_long() {
        let long = "a".repeat(1900);
        let card = RenderSnapshot {
            front: Some(long.clone()),
            example: Some(long.clone()),
            definition: Some(long),
            back: None,
        };
        let result = validate_render_request(&card, DEFAULT_MAX_TEXT_LENGTH);
        assert!(result.is_err());
        if let Err(ApiError::InvalidInput(msg)) = result {
            assert!(msg.contains("Card text too long"));
        }
    }

    #[test]
    fn test_validate_render_request_respects_configured_cap() {
        let result = validate_render_request(&snapshot(&"a".repeat(100), None), 50);
        assert!(result.is_err());
        assert!(validate_render_request(&snapshot("ok", None), 50).is_ok());
    }
}
