//! Base media-type parsing for uploaded audio blobs (§6, P8).
//!
//! Accepts forms like `audio/webm;codecs=opus` or `  Audio/WAV ; foo=bar  `
//! and extracts just the lowercased base type, ignoring any parameters.

/// The set of base media types accepted for audio submissions (§6).
pub const ALLOWED_AUDIO_BASE_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/wave",
    "audio/x-wav",
    "audio/webm",
    "audio/mp4",
    "audio/m4a",
    "audio/ogg",
    "audio/flac",
];

/// Parse the base media type out of a `Content-Type`-like string.
///
/// Returns `None` for `null`/empty/whitespace-only input. Otherwise
/// returns the lowercased substring before the first `;`, trimmed of
/// surrounding whitespace.
pub fn parse_base_media_type(raw: &str) -> Option<String> {
    let base = raw.split(';').next().unwrap_or("").trim();
    if base.is_empty() {
        None
    } else {
        Some(base.to_ascii_lowercase())
    }
}

pub fn is_allowed_audio_type(raw: &str) -> bool {
    parse_base_media_type(raw)
        .map(|base| ALLOWED_AUDIO_BASE_TYPES.contains(&base.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_base_type() {
        assert_eq!(parse_base_media_type("audio/wav"), Some("audio/wav".to_string()));
    }

    #[test]
    fn strips_parameters() {
        assert_eq!(
            parse_base_media_type("audio/webm;codecs=opus"),
            Some("audio/webm".to_string())
        );
    }

    #[test]
    fn handles_multiple_parameters_and_whitespace() {
        assert_eq!(
            parse_base_media_type("  Audio/WEBM ; codecs=opus ; foo=bar  "),
            Some("audio/webm".to_string())
        );
    }

    #[test]
    fn is_case_insensitive() {
        assert_eq!(parse_base_media_type("AUDIO/MP3"), Some("audio/mp3".to_string()));
    }

    #[test]
    fn empty_or_whitespace_only_returns_none() {
        assert_eq!(parse_base_media_type(""), None);
        assert_eq!(parse_base_media_type("   "), None);
        assert_eq!(parse_base_media_type(";codecs=opus"), None);
    }

    #[test]
    fn allowed_type_check_rejects_unknown_types() {
        assert!(is_allowed_audio_type("audio/webm;codecs=opus"));
        assert!(!is_allowed_audio_type("video/mp4"));
        assert!(!is_allowed_audio_type(""));
    }
}
