//! Mapping of acquisition failures to user-facing error categories

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Closed set of acquisition failure categories shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The user or OS refused camera access
    PermissionDenied,
    /// Camera access requires a secure context
    InsecureContext,
    /// No video input device exists
    NoCameraAvailable,
    /// The device exists but is claimed or unreadable
    CameraInUse,
    /// Anything else
    Unknown,
}

impl ErrorCategory {
    /// Every category, in classification priority order
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::PermissionDenied,
        ErrorCategory::NoCameraAvailable,
        ErrorCategory::CameraInUse,
        ErrorCategory::InsecureContext,
        ErrorCategory::Unknown,
    ];

    /// Short heading for the error state
    pub fn title(self) -> &'static str {
        match self {
            ErrorCategory::PermissionDenied => "Camera access denied",
            ErrorCategory::InsecureContext => "Secure connection required",
            ErrorCategory::NoCameraAvailable => "No camera found",
            ErrorCategory::CameraInUse => "Camera unavailable",
            ErrorCategory::Unknown => "Could not start the camera",
        }
    }

    /// Actionable guidance for the error state
    pub fn message(self) -> &'static str {
        match self {
            ErrorCategory::PermissionDenied => {
                "Allow camera access in your settings and try again, or upload a photo of the code."
            }
            ErrorCategory::InsecureContext => {
                "The camera can only be used over a secure connection. Upload a photo or type the code instead."
            }
            ErrorCategory::NoCameraAvailable => {
                "No camera was detected on this device. Upload a photo of the code or type it in."
            }
            ErrorCategory::CameraInUse => {
                "Another application is using the camera. Close it and try again, or upload a photo."
            }
            ErrorCategory::Unknown => {
                "Something went wrong while starting the camera. Try again or enter the code manually."
            }
        }
    }

    /// Stable snake_case identifier
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::InsecureContext => "insecure_context",
            ErrorCategory::NoCameraAvailable => "no_camera_available",
            ErrorCategory::CameraInUse => "camera_in_use",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PERMISSION_MARKERS: &[&str] = &[
    "notallowederror",
    "permissiondeniederror",
    "permission denied",
    "permission dismissed",
    "not allowed",
];

const NO_DEVICE_MARKERS: &[&str] = &[
    "notfounderror",
    "devicesnotfounderror",
    "overconstrainederror",
    "no camera",
    "no video",
    "not found",
    "no such device",
];

const IN_USE_MARKERS: &[&str] = &[
    "notreadableerror",
    "trackstarterror",
    "could not start video source",
];

// Matched as whole words: "in use" must not hit "in user space"
const IN_USE_WORDS: &[&str] = &["in use", "busy"];

const INSECURE_MARKERS: &[&str] = &["securityerror", "secure", "https", "ssl"];

/// Classify an acquisition failure.
///
/// Pure and total: every error maps to exactly one category. A permission
/// refusal wins over an insecure environment, an insecure environment wins over
/// anything unrecognised.
pub fn classify(error: &Error, secure_context: bool) -> ErrorCategory {
    if let Some(category) = classify_io(error) {
        return category;
    }

    if matches!(error, Error::CameraNotFound(_)) {
        return ErrorCategory::NoCameraAvailable;
    }

    let haystack = match error {
        Error::Media { name, message } => format!("{name} {message}"),
        other => other.to_string(),
    }
    .to_ascii_lowercase();

    let mentions = |markers: &[&str]| markers.iter().any(|m| haystack.contains(m));
    let mentions_word = |words: &[&str]| words.iter().any(|w| contains_word(&haystack, w));

    if mentions(PERMISSION_MARKERS) {
        ErrorCategory::PermissionDenied
    } else if mentions(NO_DEVICE_MARKERS) {
        ErrorCategory::NoCameraAvailable
    } else if mentions(IN_USE_MARKERS) || mentions_word(IN_USE_WORDS) {
        ErrorCategory::CameraInUse
    } else if mentions(INSECURE_MARKERS) || !secure_context {
        ErrorCategory::InsecureContext
    } else {
        ErrorCategory::Unknown
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    haystack.match_indices(word).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + word.len()..].chars().next();
        !is_word(before) && !is_word(after)
    })
}

fn classify_io(error: &Error) -> Option<ErrorCategory> {
    let source = match error {
        Error::Device { source, .. } | Error::Io(source) => source,
        _ => return None,
    };

    match source.kind() {
        io::ErrorKind::PermissionDenied => Some(ErrorCategory::PermissionDenied),
        io::ErrorKind::NotFound => Some(ErrorCategory::NoCameraAvailable),
        io::ErrorKind::ResourceBusy => Some(ErrorCategory::CameraInUse),
        // ENODEV is reported as an uncategorised kind
        _ if source.raw_os_error() == Some(19) => Some(ErrorCategory::NoCameraAvailable),
        _ => None,
    }
}
