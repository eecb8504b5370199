//! Notification ingestion — envelope decode, message normalization, pipeline.

pub mod envelope;
pub mod normalize;
pub mod pipeline;

pub use envelope::{decode_envelope, MailboxNotification};
pub use normalize::NormalizedMessage;
pub use pipeline::{IngestOutcome, Ingestor};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

/// Decode base64 accepting both standard and url-safe alphabets, padded or
/// not. Pub/Sub and Gmail both document url-safe encoding but real payloads
/// (and hand-written test fixtures) show up in either.
pub(crate) fn decode_base64_lenient(data: &str) -> Option<Vec<u8>> {
    let data = data.trim();
    for engine in [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD] {
        if let Ok(bytes) = engine.decode(data) {
            return Some(bytes);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_standard_and_url_safe() {
        // These bytes encode differently under the two alphabets.
        let bytes = b"\xfb\xff\xbf";
        let standard = STANDARD.encode(bytes);
        let url_safe = URL_SAFE_NO_PAD.encode(bytes);
        assert_ne!(standard, url_safe);
        assert_eq!(decode_base64_lenient(&standard).unwrap(), bytes);
        assert_eq!(decode_base64_lenient(&url_safe).unwrap(), bytes);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_base64_lenient("not base64 at all!").is_none());
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let encoded = format!("  {}\n", STANDARD.encode(b"hello"));
        assert_eq!(decode_base64_lenient(&encoded).unwrap(), b"hello");
    }
}
