use crate::error::{ObfuscatorError, Result};

/// Escape every byte as a `\xNN` sequence for a PHP double-quoted string
pub fn hex_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 4);
    for byte in text.bytes() {
        escaped.push_str("\\x");
        escaped.push_str(&hex::encode([byte]));
    }
    escaped
}

/// Reverse [`hex_escape`], leaving non-escaped characters untouched
pub fn hex_unescape(text: &str) -> Result<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') {
            let digits = bytes.get(i + 2..i + 4).ok_or_else(|| {
                ObfuscatorError::NotObfuscated("truncated escape sequence".into())
            })?;
            let decoded = hex::decode(digits).map_err(|e| {
                ObfuscatorError::NotObfuscated(format!("bad escape sequence: {}", e))
            })?;
            out.extend(decoded);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    Ok(String::from_utf8(out)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_hides_identifiers() {
        let escaped = hex_escape("@eval(cryptOf(");
        assert_eq!(escaped, "\\x40\\x65\\x76\\x61\\x6c\\x28\\x63\\x72\\x79\\x70\\x74\\x4f\\x66\\x28");
        assert!(!escaped.contains("eval"));
    }

    #[test]
    fn test_unescape_mixed_content() {
        let mixed = format!("{}'PAYLOAD'{}", hex_escape("f("), hex_escape(");"));
        assert_eq!(hex_unescape(&mixed).unwrap(), "f('PAYLOAD');");
    }

    #[test]
    fn test_unescape_rejects_truncated_sequence() {
        assert!(hex_unescape("\\x4").is_err());
        assert!(hex_unescape("\\xzz").is_err());
    }
}
