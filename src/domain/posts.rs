use std::fmt;

use super::error::DomainError;

pub const DEFAULT_MAX_CONTENT_CHARS: usize = 280;
pub const DEFAULT_FEED_LIMIT: usize = 100;
pub const CONTENT_FIELD: &str = "content";

/// Post body that passed validation: surrounding whitespace removed,
/// between one and `max_chars` Unicode scalar values long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostContent(String);

impl PostContent {
    pub fn parse(raw: &str, max_chars: usize) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation(
                CONTENT_FIELD,
                "Post must contain at least 1 character",
            ));
        }

        let length = trimmed.chars().count();
        if length > max_chars {
            return Err(DomainError::validation(
                CONTENT_FIELD,
                format!("Post must contain at most {max_chars} characters"),
            ));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PostContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace_only_content() {
        for raw in ["", "   ", "\n\t"] {
            let err = PostContent::parse(raw, DEFAULT_MAX_CONTENT_CHARS).expect_err(raw);
            assert!(matches!(
                err,
                DomainError::Validation {
                    field: CONTENT_FIELD,
                    ..
                }
            ));
        }
    }

    #[test]
    fn counts_characters_not_bytes() {
        // Each flame is four UTF-8 bytes but a single character.
        let flames = "🔥".repeat(DEFAULT_MAX_CONTENT_CHARS);
        let content = PostContent::parse(&flames, DEFAULT_MAX_CONTENT_CHARS).expect("fits");
        assert_eq!(content.as_str().chars().count(), DEFAULT_MAX_CONTENT_CHARS);

        let too_long = "🔥".repeat(DEFAULT_MAX_CONTENT_CHARS + 1);
        assert!(PostContent::parse(&too_long, DEFAULT_MAX_CONTENT_CHARS).is_err());
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let content = PostContent::parse("  🔥🚀 ", 5).expect("valid");
        assert_eq!(content.into_inner(), "🔥🚀");
    }
}
