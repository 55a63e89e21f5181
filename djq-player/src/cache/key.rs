//! Content keys

use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identity of a cached media file
///
/// Derived from the canonical URL, or from a hash of the free-text query when
/// the track has no stable URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey(String);

impl ContentKey {
    pub fn from_url(url: &str) -> Self {
        Self(url.trim().to_string())
    }

    pub fn from_query(query: &str) -> Self {
        let normalized = query.trim().to_lowercase();
        Self(format!("query:{}", hex_digest(normalized.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic file stem for this key (16 hex digits)
    pub fn file_stem(&self) -> String {
        hex_digest(self.0.as_bytes())[..16].to_string()
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_key_ignores_surrounding_whitespace() {
        assert_eq!(
            ContentKey::from_url(" https://example.com/a "),
            ContentKey::from_url("https://example.com/a")
        );
    }

    #[test]
    fn test_query_key_is_case_insensitive_hash() {
        let a = ContentKey::from_query("Daft Punk - One More Time");
        let b = ContentKey::from_query("daft punk - one more time ");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("query:"));
        assert_ne!(a, ContentKey::from_query("something else"));
    }

    #[test]
    fn test_file_stem_is_stable_hex() {
        let key = ContentKey::from_url("https://example.com/a");
        let stem = key.file_stem();
        assert_eq!(stem.len(), 16);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(stem, ContentKey::from_url("https://example.com/a").file_stem());
        assert_ne!(stem, ContentKey::from_url("https://example.com/b").file_stem());
    }
}
