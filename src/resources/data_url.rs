//! Inline `data:` URL decoding (RFC 2397).

use base64::Engine;
use bytes::Bytes;

use crate::error::{RenderError, Result};

const DATA_URL_PREFIX: &str = "data:";

/// Whether `url` is a `data:` URL.
pub fn is_data_url(url: &str) -> bool {
    url.get(..DATA_URL_PREFIX.len())
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(DATA_URL_PREFIX))
}

/// Decode the payload of a `data:` URL.
///
/// Base64 payloads tolerate embedded ASCII whitespace; everything else is
/// percent-decoded without treating `+` specially.
pub fn decode(url: &str) -> Result<Bytes> {
    if !is_data_url(url) {
        return Err(invalid(url, "URL does not start with 'data:'"));
    }

    let rest = &url[DATA_URL_PREFIX.len()..];
    let (metadata, data) = rest
        .split_once(',')
        .ok_or_else(|| invalid(url, "missing comma"))?;

    let is_base64 = metadata
        .split(';')
        .skip(1)
        .any(|param| param.trim().eq_ignore_ascii_case("base64"));

    if is_base64 {
        let cleaned: Vec<u8> = data.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(cleaned)
            .map(Bytes::from)
            .map_err(|e| invalid(url, format!("invalid base64: {e}")))
    } else {
        Ok(Bytes::from(urlencoding::decode_binary(data.as_bytes()).into_owned()))
    }
}

fn invalid(url: &str, reason: impl std::fmt::Display) -> RenderError {
    // Data URLs can be huge; keep the error readable.
    let shown: String = url.chars().take(48).collect();
    RenderError::fetch(shown, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_payload() {
        let bytes = decode("data:image/gif;base64,R0lG\nODlh").unwrap();
        assert_eq!(&bytes[..], b"GIF89a");
    }

    #[test]
    fn test_percent_encoded_payload() {
        let bytes = decode("data:text/plain,a%20b+c").unwrap();
        assert_eq!(&bytes[..], b"a b+c");
    }

    #[test]
    fn test_empty_metadata() {
        assert_eq!(&decode("data:,hello").unwrap()[..], b"hello");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(decode("data:text/plain").is_err());
        assert!(decode("https://example.com/a.png").is_err());
        assert!(decode("data:;base64,@@@").is_err());
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        assert!(is_data_url("DATA:,x"));
        assert!(!is_data_url("dat"));
    }
}
