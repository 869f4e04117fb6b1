use crate::bail;
use crate::error::{EngineResult, ErrorKind};

/// Decodes a hex encoded binary value.
///
/// Accepts bare digits as well as the `\x` and `0x` prefixes used by source drivers when they
/// render blobs as text. Digits may be upper or lower case.
pub fn decode_hex(s: &str) -> EngineResult<Vec<u8>> {
    let digits = s
        .strip_prefix("\\x")
        .or_else(|| s.strip_prefix("0x"))
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    if digits.len() % 2 != 0 {
        bail!(
            ErrorKind::ConversionError,
            "Could not decode hex string to bytes",
            "The number of digits is odd"
        );
    }

    if !digits.is_ascii() {
        bail!(
            ErrorKind::ConversionError,
            "Could not decode hex string to bytes",
            "The string contains non hex characters"
        );
    }

    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for i in (0..digits.len()).step_by(2) {
        bytes.push(u8::from_str_radix(&digits[i..i + 2], 16)?);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hex_empty() {
        assert_eq!(decode_hex("").unwrap(), Vec::<u8>::new());
        assert_eq!(decode_hex("\\x").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn decode_hex_bare_digits() {
        assert_eq!(decode_hex("48656C6C6F").unwrap(), b"Hello");
    }

    #[test]
    fn decode_hex_prefixed() {
        assert_eq!(decode_hex("\\x00ff").unwrap(), vec![0x00, 0xff]);
        assert_eq!(decode_hex("0xaBcD").unwrap(), vec![0xab, 0xcd]);
    }

    #[test]
    fn decode_hex_odd_length() {
        let err = decode_hex("abc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
        assert!(err.to_string().contains("odd"));
    }

    #[test]
    fn decode_hex_invalid_digits() {
        let err = decode_hex("zz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn decode_hex_non_ascii() {
        assert!(decode_hex("éé").is_err());
    }
}
