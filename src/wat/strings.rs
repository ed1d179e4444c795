//! String literal decoding.
//!
//! The lexer hands string contents through raw; this module resolves escape
//! sequences into the byte sequence the literal denotes. WAT strings are
//! byte strings: `\xx` hex escapes can produce arbitrary bytes, so the
//! result is `Vec<u8>`, not `String`.

use super::error::LexError;
use super::token::Span;

/// Decode the raw contents of a string literal into bytes.
///
/// Recognised escapes: `\t`, `\n`, `\r`, `\"`, `\'`, `\\`, two-digit hex
/// (`\xx`), and `\u{...}` (encoded as UTF-8). All other characters pass
/// through as their UTF-8 bytes.
///
/// `span` locates the literal in the source and is attached to any error.
pub fn decode_string(raw: &str, span: Span) -> Result<Vec<u8>, LexError> {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        let escape = chars
            .next()
            .ok_or_else(|| LexError::new("unterminated escape sequence", span))?;

        match escape {
            't' => bytes.push(0x09),
            'n' => bytes.push(0x0A),
            'r' => bytes.push(0x0D),
            '"' => bytes.push(0x22),
            '\'' => bytes.push(0x27),
            '\\' => bytes.push(0x5C),
            'u' => decode_unicode_escape(&mut chars, &mut bytes, span)?,
            c if c.is_ascii_hexdigit() => {
                let high = c.to_digit(16).unwrap() as u8;
                let low = chars
                    .next()
                    .and_then(|c| c.to_digit(16))
                    .ok_or_else(|| LexError::new("invalid hex escape", span))? as u8;
                bytes.push((high << 4) | low);
            }
            other => {
                return Err(LexError::new(format!("invalid escape sequence: \\{}", other), span));
            }
        }
    }

    Ok(bytes)
}

/// Decode `\u{...}` (after the `u`), appending UTF-8 bytes.
fn decode_unicode_escape(chars: &mut std::str::Chars, bytes: &mut Vec<u8>, span: Span) -> Result<(), LexError> {
    if chars.next() != Some('{') {
        return Err(LexError::new("expected '{' after \\u", span));
    }

    let mut digits = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            let code_point = u32::from_str_radix(&digits, 16)
                .map_err(|_| LexError::new("invalid unicode escape", span))?;
            let c = char::from_u32(code_point)
                .ok_or_else(|| LexError::new(format!("invalid unicode code point: U+{:X}", code_point), span))?;
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            return Ok(());
        }
        digits.push(c);
    }

    Err(LexError::new("unterminated unicode escape", span))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Vec<u8> {
        decode_string(raw, Span::new(0, raw.len(), 1, 1)).expect("decode failed")
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(decode("hi"), b"hi");
        assert_eq!(decode(""), b"");
    }

    #[test]
    fn named_escapes() {
        assert_eq!(decode("a\\tb"), b"a\tb");
        assert_eq!(decode("a\\nb"), b"a\nb");
        assert_eq!(decode("\\\"quoted\\\""), b"\"quoted\"");
        assert_eq!(decode("back\\\\slash"), b"back\\slash");
    }

    #[test]
    fn hex_escapes_produce_raw_bytes() {
        assert_eq!(decode("\\00\\ff"), vec![0x00, 0xFF]);
        assert_eq!(decode("\\48\\69"), b"Hi");
    }

    #[test]
    fn unicode_escape_encodes_utf8() {
        assert_eq!(decode("\\u{48}"), b"H");
        assert_eq!(decode("\\u{1F600}"), "\u{1F600}".as_bytes());
    }

    #[test]
    fn multibyte_source_chars_pass_through_as_utf8() {
        assert_eq!(decode("caf\u{e9}"), "caf\u{e9}".as_bytes());
    }

    #[test]
    fn invalid_escape_fails() {
        let span = Span::new(0, 2, 1, 1);
        assert!(decode_string("\\z", span).is_err());
        assert!(decode_string("\\", span).is_err());
        assert!(decode_string("\\4", span).is_err());
        assert!(decode_string("\\u{110000}", span).is_err());
        assert!(decode_string("\\u{48", span).is_err());
    }
}
