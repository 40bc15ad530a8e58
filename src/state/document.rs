//! The tool's state document.
//!
//! The document is opaque: it is moved between the local slot and the
//! remote store byte for byte and never parsed. The digest is only used to
//! let operators compare copies in logs and `show-state` output.

use sha2::{Digest, Sha256};

/// Opaque state document bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateDocument(Vec<u8>);

impl StateDocument {
    /// Wraps raw bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the document bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the document, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the document has no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Computes the SHA-256 digest of the document as hex.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.0);
        hex::encode(hasher.finalize())
    }

    /// Returns the first 8 characters of the digest, for display.
    #[must_use]
    pub fn short_digest(&self) -> String {
        self.digest().chars().take(8).collect()
    }
}

impl From<Vec<u8>> for StateDocument {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for StateDocument {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        let doc = StateDocument::from("{\"version\": 3}");
        assert_eq!(doc.digest(), StateDocument::new(b"{\"version\": 3}".to_vec()).digest());
        assert_eq!(doc.digest().len(), 64);
        assert_eq!(doc.short_digest().len(), 8);
    }

    #[test]
    fn test_digest_of_empty_document() {
        let doc = StateDocument::default();
        assert!(doc.is_empty());
        assert_eq!(
            doc.digest(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_bytes_are_untouched() {
        let raw = vec![0_u8, 159, 146, 150, b'\n'];
        let doc = StateDocument::new(raw.clone());
        assert_eq!(doc.len(), 5);
        assert_eq!(doc.into_bytes(), raw);
    }
}
