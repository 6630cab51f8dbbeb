use crate::{error::InvalidRequest, format::AudioFormat};

/// Maximum text length (in characters) accepted for synthesis.
pub const MAX_TEXT_CHARS: usize = 2000;

/// A synthesis request as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: Option<String>,
    pub format: AudioFormat,
}

/// A request whose fields are trimmed and validated. Only these are used for
/// key derivation, so `" hello "` and `"hello"` share a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub text: String,
    pub voice: Option<String>,
    pub format: AudioFormat,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, voice: Option<String>, format: AudioFormat) -> Self {
        Self {
            text: text.into(),
            voice,
            format,
        }
    }

    pub fn canonicalize(&self) -> Result<CanonicalRequest, InvalidRequest> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(InvalidRequest::EmptyText);
        }
        let len = text.chars().count();
        if len > MAX_TEXT_CHARS {
            return Err(InvalidRequest::TextTooLong {
                len,
                max: MAX_TEXT_CHARS,
            });
        }

        let voice = self
            .voice
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok(CanonicalRequest {
            text: text.to_string(),
            voice,
            format: self.format,
        })
    }
}
