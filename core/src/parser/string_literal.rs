//! Decoding of quoted and long-bracket string bodies into raw bytes.

/// Decode the body of a quoted string (without the quotes).
///
/// On failure the offending escape sequence is returned.
pub fn unescape(raw: &str) -> Result<Vec<u8>, String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c != b'\\' {
            out.push(c);
            i += 1;
            continue;
        }

        let Some(&e) = bytes.get(i + 1) else {
            return Err("\\".to_string());
        };
        i += 2;
        match e {
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'\\' => out.push(b'\\'),
            b'"' => out.push(b'"'),
            b'\'' => out.push(b'\''),
            b'\n' => {
                out.push(b'\n');
                if bytes.get(i) == Some(&b'\r') {
                    i += 1;
                }
            }
            b'\r' => {
                out.push(b'\n');
                if bytes.get(i) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'z' => {
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
            }
            b'x' => {
                let hex = raw.get(i..i + 2).ok_or_else(|| format!("\\x{}", &raw[i..]))?;
                let value =
                    u8::from_str_radix(hex, 16).map_err(|_| format!("\\x{}", hex))?;
                out.push(value);
                i += 2;
            }
            b'u' => {
                let rest = &raw[i..];
                let close = rest
                    .strip_prefix('{')
                    .and_then(|r| r.find('}'))
                    .ok_or_else(|| "\\u".to_string())?;
                let digits = &rest[1..close + 1];
                let code = u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("\\u{{{}}}", digits))?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(code.encode_utf8(&mut buf).as_bytes());
                i += close + 2;
            }
            d if d.is_ascii_digit() => {
                let start = i - 1;
                let mut end = i;
                while end < bytes.len() && end - start < 3 && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let value: u32 = raw[start..end]
                    .parse()
                    .map_err(|_| format!("\\{}", &raw[start..end]))?;
                if value > 255 {
                    return Err(format!("\\{}", &raw[start..end]));
                }
                out.push(value as u8);
                i = end;
            }
            other => return Err(format!("\\{}", other as char)),
        }
    }

    Ok(out)
}

/// Body of a long bracket string. A newline directly after the opening
/// bracket is not part of the string.
pub fn long_body(raw: &str) -> Vec<u8> {
    let body = raw
        .strip_prefix("\r\n")
        .or_else(|| raw.strip_prefix("\n\r"))
        .or_else(|| raw.strip_prefix('\n'))
        .or_else(|| raw.strip_prefix('\r'))
        .unwrap_or(raw);
    body.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_escapes() {
        assert_eq!(unescape(r"a\tb\n").unwrap(), b"a\tb\n".to_vec());
        assert_eq!(unescape(r#"\"q\'"#).unwrap(), b"\"q'".to_vec());
    }

    #[test]
    fn test_decimal_and_hex_escapes() {
        assert_eq!(unescape(r"\65\066\x43").unwrap(), b"ABC".to_vec());
        assert_eq!(unescape(r"\0009").unwrap(), vec![0, b'9']);
        assert_eq!(unescape(r"\255").unwrap(), vec![255]);
    }

    #[test]
    fn test_z_skips_whitespace() {
        assert_eq!(unescape("a\\z  \n  b").unwrap(), b"ab".to_vec());
    }

    #[test]
    fn test_unicode_escape() {
        assert_eq!(unescape(r"\u{48}\u{e9}").unwrap(), "Hé".as_bytes().to_vec());
    }

    #[test]
    fn test_invalid_escapes() {
        assert_eq!(unescape(r"\256"), Err(r"\256".to_string()));
        assert_eq!(unescape(r"\q"), Err(r"\q".to_string()));
        assert!(unescape(r"\xZ1").is_err());
    }

    #[test]
    fn test_long_body_drops_leading_newline() {
        assert_eq!(long_body("\nabc\n"), b"abc\n".to_vec());
        assert_eq!(long_body("abc"), b"abc".to_vec());
    }
}
