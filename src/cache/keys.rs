//! Cache key definitions.

use std::fmt;

/// Identifies one stored representation.
///
/// Content type, charset and language are folded to ASCII lowercase so that
/// requests negotiating the same variant with different header casing share
/// an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    logical_key: String,
    content_type: String,
    charset: String,
    language: String,
}

impl CacheKey {
    pub fn new(
        logical_key: impl Into<String>,
        content_type: &str,
        charset: &str,
        language: &str,
    ) -> Self {
        Self {
            logical_key: logical_key.into(),
            content_type: content_type.trim().to_ascii_lowercase(),
            charset: charset.trim().to_ascii_lowercase(),
            language: language.trim().to_ascii_lowercase(),
        }
    }

    pub fn logical_key(&self) -> &str {
        &self.logical_key
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.logical_key, self.content_type, self.charset, self.language
        )
    }
}
