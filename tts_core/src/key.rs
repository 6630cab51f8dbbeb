use std::fmt;

use sha2::{Digest, Sha256};

use crate::format::AudioFormat;

const KEY_DOMAIN: &[u8] = b"tts-cache/v1";

/// Content address of a cache entry.
///
/// The digest covers text, voice and format, so the same text cached as mp3
/// and as wav lives under two unrelated keys. The format is also carried
/// alongside the digest because the store needs it for the file extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    digest: String,
    format: AudioFormat,
}

impl CacheKey {
    /// Derive the key for a `(text, voice, format)` triple.
    ///
    /// Every field is length-prefixed before hashing so that field boundaries
    /// can't shift (`("ab", "c")` and `("a", "bc")` hash differently). An
    /// absent voice is an empty segment.
    pub fn derive(text: &str, voice: Option<&str>, format: AudioFormat) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        for field in [text, voice.unwrap_or(""), format.extension()] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        Self {
            digest: hex::encode(hasher.finalize()),
            format,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// File name of the published entry, e.g. `<digest>.mp3`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.digest, self.format.extension())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", &self.digest[..12], self.format)
    }
}
