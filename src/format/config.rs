//! Token syntax for persisted records.
//!
//! A record is a line of whitespace-separated tokens. A token may be wrapped
//! in double quotes to carry embedded spaces. Octet strings are written as
//! `"text"` when every byte is alphanumeric or a space, as `0x`-prefixed hex
//! otherwise, and as `""` when empty.

use super::hex;

/// Split one record line into tokens, honoring double quotes.
///
/// A quoted token has its quotes removed. `\"` inside quotes is a literal
/// quote.
///
/// ```
/// use snmp_agent_core::format::config::tokenize;
///
/// let tokens = tokenize(r#"usmUser 1 3 "my user" 0x0102"#);
/// assert_eq!(tokens, vec!["usmUser", "1", "3", "my user", "0x0102"]);
/// ```
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut token = String::new();
        if first == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' if chars.peek() == Some(&'"') => {
                        token.push('"');
                        chars.next();
                    }
                    '"' => break,
                    _ => token.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
        }
        tokens.push(token);
    }

    tokens
}

/// Render an octet string token.
pub fn write_octets(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "\"\"".to_string();
    }
    let printable = bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b' ');
    // Text that starts like a hex token would read back as hex.
    let ambiguous = bytes.len() >= 2 && bytes[0] == b'0' && bytes[1].eq_ignore_ascii_case(&b'x');
    if printable && !ambiguous {
        let mut s = String::with_capacity(bytes.len() + 2);
        s.push('"');
        s.extend(bytes.iter().map(|&b| b as char));
        s.push('"');
        s
    } else {
        format!("0x{}", hex::encode(bytes))
    }
}

/// Parse an octet string token produced by [`write_octets`] (after
/// [`tokenize`] has stripped any quotes).
pub fn read_octets(token: &str) -> Result<Vec<u8>, hex::DecodeError> {
    match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(digits) => hex::decode(digits),
        None => Ok(token.as_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_handles_quotes() {
        assert_eq!(tokenize("  a  b\tc "), vec!["a", "b", "c"]);
        assert_eq!(tokenize(r#""" x"#), vec!["", "x"]);
        assert_eq!(tokenize(r#""say \"hi\"" end"#), vec![r#"say "hi""#, "end"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn octets_quoted_or_hex() {
        assert_eq!(write_octets(b"bob"), "\"bob\"");
        assert_eq!(write_octets(b"two words"), "\"two words\"");
        assert_eq!(write_octets(&[0x80, 0x00, 0x1f]), "0x80001f");
        assert_eq!(write_octets(b"a-b"), "0x612d62");
        assert_eq!(write_octets(b""), "\"\"");
        assert_eq!(write_octets(b"0x41"), "0x30783431");
    }

    #[test]
    fn octets_survive_a_line() {
        for value in [&b"bob"[..], b"two words", &[0x80, 0x00, 0x1f, 0x88], b""] {
            let line = format!("x {} y", write_octets(value));
            let tokens = tokenize(&line);
            assert_eq!(read_octets(&tokens[1]).unwrap(), value);
        }
    }
}
