//! Identifier extraction from decoded payloads and manual input
//!
//! Work-order codes are printed either as bare short codes or embedded in a
//! URL (`https://host/verify/<id>?ref=label`). Both shapes reduce to the same
//! identifier here, so the host never needs to know where a code came from.

use serde::{Deserialize, Serialize};

/// Path markers that precede an embedded identifier
pub const DEFAULT_MARKERS: &[&str] = &["/verify/", "/card/", "/c/"];

/// Extracts canonical identifiers from raw payloads
#[derive(Debug, Clone)]
pub struct IdentifierNormalizer {
    markers: Vec<String>,
}

impl IdentifierNormalizer {
    /// Create a normalizer with the default markers
    pub fn new() -> Self {
        Self::with_markers(DEFAULT_MARKERS.iter().copied())
    }

    /// Create a normalizer with custom embedded-path markers.
    ///
    /// Markers are matched ASCII case-insensitively; empty markers are ignored.
    pub fn with_markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers = markers
            .into_iter()
            .map(|m| m.as_ref().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    /// Configured markers (lower-cased)
    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// Normalize a decoded payload.
    ///
    /// Returns the segment following the first known marker, cut at `?`, `#`
    /// or `/`; payloads without a marker are returned unchanged. `None` when
    /// nothing usable remains.
    pub fn normalize(&self, payload: &str) -> Option<String> {
        let identifier = match self.extract(payload) {
            Some(segment) => segment,
            None => payload,
        };

        if identifier.trim().is_empty() {
            None
        } else {
            Some(identifier.to_string())
        }
    }

    /// Normalize free text typed (or picked) by the user.
    ///
    /// Short codes are case-insensitive by convention, so manual input is
    /// trimmed and upper-cased.
    pub fn normalize_manual(&self, text: &str) -> Option<String> {
        self.normalize(text.trim())
            .map(|id| id.trim().to_uppercase())
            .filter(|id| !id.is_empty())
    }

    fn extract<'a>(&self, payload: &'a str) -> Option<&'a str> {
        // ASCII lowering keeps byte offsets aligned with the original payload
        let lowered = payload.to_ascii_lowercase();

        let (start, marker) = self
            .markers
            .iter()
            .filter_map(|marker| lowered.find(marker.as_str()).map(|idx| (idx, marker)))
            .min_by_key(|(idx, _)| *idx)?;

        let rest = &payload[start + marker.len()..];
        let end = rest.find(['?', '#', '/']).unwrap_or(rest.len());
        Some(&rest[..end])
    }
}

impl Default for IdentifierNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// A validated identifier together with the payload it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedResult {
    /// Payload as decoded or typed
    pub raw_payload: String,
    /// Canonical identifier handed to the host
    pub identifier: String,
}

impl DecodedResult {
    /// Build a result from a decoded QR payload
    pub fn from_payload(normalizer: &IdentifierNormalizer, payload: &str) -> Option<Self> {
        normalizer.normalize(payload).map(|identifier| Self {
            raw_payload: payload.to_string(),
            identifier,
        })
    }

    /// Build a result from manual input
    pub fn from_manual(normalizer: &IdentifierNormalizer, text: &str) -> Option<Self> {
        normalizer.normalize_manual(text).map(|identifier| Self {
            raw_payload: text.to_string(),
            identifier,
        })
    }
}

/// Host-supplied quick-select shortcut
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Identifier submitted when selected
    pub id: String,
    /// Display label
    pub label: String,
}

impl Suggestion {
    /// Create a suggestion
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}
