//! Subscription document decoding
//!
//! A subscription body is URL-safe base64 wrapping whitespace-separated
//! `ssr://` URIs, optionally headed by a `MAX=<n>` line that caps how many
//! profiles are kept.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use tracing::debug;

use super::profile::Profile;
use crate::{Error, Result};

/// Prefix of the subset directive
pub const MAX_DIRECTIVE: &str = "MAX=";

/// URI scheme recognised inside a document
pub const SSR_SCHEME: &str = "ssr://";

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode URL-safe base64, ignoring whitespace and padding and accepting
/// the standard alphabet's `+` and `/`.
pub fn decode_base64(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    LENIENT.decode(cleaned.trim_end_matches('='))
}

/// Encode bytes as unpadded URL-safe base64
pub fn encode_base64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a raw subscription body into document text.
///
/// A `MAX=` line in front of the base64 payload is kept and re-attached as
/// the first line of the decoded text.
pub fn decode_document(raw: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| Error::network(format!("Subscription body is not UTF-8: {}", e)))?;
    let text = text.trim_start_matches('\u{feff}').trim();

    let (directive, payload) = match text.split_once('\n') {
        Some((first, rest)) if first.trim_start().starts_with(MAX_DIRECTIVE) => {
            (Some(first.trim()), rest)
        }
        None if text.starts_with(MAX_DIRECTIVE) => (Some(text), ""),
        _ => (None, text),
    };

    let decoded = decode_base64(payload)
        .map_err(|e| Error::network(format!("Failed to decode subscription: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| Error::network(format!("Decoded subscription is not UTF-8: {}", e)))?;

    Ok(match directive {
        Some(directive) => format!("{}\n{}", directive, decoded),
        None => decoded,
    })
}

/// Read the `MAX=` limit from the first line of decoded text.
///
/// Every non-digit between the first `MAX=` and the next one (or the end
/// of the line) is dropped; no digits left, or a value that overflows,
/// means no limit.
pub fn parse_max_directive(text: &str) -> Option<usize> {
    let first_line = text.lines().next()?.trim();
    let rest = first_line.strip_prefix(MAX_DIRECTIVE)?;
    let value = rest.split(MAX_DIRECTIVE).next().unwrap_or_default();
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Decoded document contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    /// Subset limit from the `MAX=` directive
    pub limit: Option<usize>,
    /// Candidate profiles in document order
    pub profiles: Vec<Profile>,
}

impl ParsedDocument {
    /// Group label of the first candidate, if it has one
    pub fn group(&self) -> Option<&str> {
        self.profiles
            .first()
            .map(|p| p.group.as_str())
            .filter(|g| !g.is_empty())
    }
}

/// Extract every parseable `ssr://` URI from decoded text
pub fn find_profiles(text: &str) -> Vec<Profile> {
    text.split_whitespace()
        .filter_map(|token| token.find(SSR_SCHEME).map(|at| &token[at..]))
        .filter_map(|uri| match Profile::parse_uri(uri) {
            Ok(profile) => Some(profile),
            Err(e) => {
                debug!(error = %e, "Skipping unparseable profile URI");
                None
            }
        })
        .collect()
}

/// Parse decoded text into limit and candidates
pub fn parse_document(text: &str) -> ParsedDocument {
    ParsedDocument {
        limit: parse_max_directive(text),
        profiles: find_profiles(text),
    }
}
