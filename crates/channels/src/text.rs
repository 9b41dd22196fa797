//! Text sanitising at the routing boundary.
//!
//! Nothing here fails: undecodable input becomes U+FFFD and unusable
//! characters are dropped.

use std::borrow::Cow;

/// Strip characters that cannot be relayed: control characters other than
/// newline/tab, and Unicode noncharacters.
#[must_use]
pub fn normalize(input: &str) -> String {
    input.chars().filter(|c| is_relayable(*c)).collect()
}

/// Decode UTF-16, replacing lone surrogates, then [`normalize`].
#[must_use]
pub fn normalize_utf16(units: &[u16]) -> String {
    let decoded: String = char::decode_utf16(units.iter().copied())
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    normalize(&decoded)
}

/// Decode bytes as UTF-8, replacing invalid sequences, then [`normalize`].
#[must_use]
pub fn normalize_bytes(bytes: &[u8]) -> String {
    normalize(&String::from_utf8_lossy(bytes))
}

fn is_relayable(c: char) -> bool {
    if c.is_control() {
        return matches!(c, '\n' | '\r' | '\t');
    }
    let cp = c as u32;
    // U+FDD0..U+FDEF and U+xxFFFE / U+xxFFFF are permanently unassigned.
    !((0xFDD0..=0xFDEF).contains(&cp) || cp & 0xFFFE == 0xFFFE)
}

/// Rewrite unpaired `\uD800`-`\uDFFF` escapes in raw JSON to `�`.
///
/// JSON permits lone surrogate escapes but they cannot become a Rust
/// `String`, so a strict parser rejects the whole payload. Well-formed
/// pairs and escaped backslashes are left untouched.
#[must_use]
pub fn repair_json_surrogates(raw: &str) -> Cow<'_, str> {
    if !raw.contains("\\u") {
        return Cow::Borrowed(raw);
    }

    let bytes = raw.as_bytes();
    let mut out = String::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        if bytes.get(i + 1) != Some(&b'u') {
            // Any other escape, including `\\`, is two bytes.
            i += 2;
            continue;
        }
        let Some(unit) = hex4(bytes, i + 2) else {
            i += 2;
            continue;
        };

        if is_high_surrogate(unit) {
            let paired = bytes.get(i + 6) == Some(&b'\\')
                && bytes.get(i + 7) == Some(&b'u')
                && hex4(bytes, i + 8).is_some_and(is_low_surrogate);
            if paired {
                i += 12;
                continue;
            }
        } else if !is_low_surrogate(unit) {
            i += 6;
            continue;
        }

        out.push_str(&raw[copied..i]);
        out.push_str("\\uFFFD");
        i += 6;
        copied = i;
    }

    if copied == 0 {
        return Cow::Borrowed(raw);
    }
    out.push_str(&raw[copied..]);
    Cow::Owned(out)
}

fn hex4(bytes: &[u8], at: usize) -> Option<u16> {
    let digits = bytes.get(at..at + 4)?;
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let digits = std::str::from_utf8(digits).ok()?;
    u16::from_str_radix(digits, 16).ok()
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..0xDC00).contains(&unit)
}

fn is_low_surrogate(unit: u16) -> bool {
    (0xDC00..0xE000).contains(&unit)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_ordinary_text_and_whitespace() {
        let text = "Release v2 🚀\n\tDetails: «важное»\r\n";
        assert_eq!(normalize(text), text);
    }

    #[test]
    fn strips_controls_and_noncharacters() {
        assert_eq!(normalize("a\u{0}b\u{7}c\u{FFFF}d\u{FDD0}e"), "abcde");
    }

    #[test]
    fn unpaired_low_surrogate_is_replaced() {
        let out = normalize_utf16(&[0x0041, 0xDC00, 0x0042]);
        assert_eq!(out, "A\u{FFFD}B");
    }

    #[test]
    fn unpaired_high_surrogate_at_end_is_replaced() {
        let out = normalize_utf16(&[0x0041, 0xD83D]);
        assert_eq!(out, "A\u{FFFD}");
    }

    #[test]
    fn valid_pair_decodes() {
        // U+1F680 ROCKET
        assert_eq!(normalize_utf16(&[0xD83D, 0xDE80]), "🚀");
    }

    #[test]
    fn invalid_utf8_bytes_are_replaced() {
        assert_eq!(normalize_bytes(b"ok\xFF\xFEok"), "ok\u{FFFD}\u{FFFD}ok");
    }

    #[test]
    fn repair_leaves_clean_json_borrowed() {
        let raw = r#"{"content": "hi 🚀 and é and \\udc00"}"#;
        assert!(matches!(repair_json_surrogates(raw), Cow::Borrowed(_)));
    }

    #[test]
    fn repair_makes_lone_surrogates_parseable() {
        let raw = r#"{"content": "a\udc00b\ud83dc"}"#;
        assert!(serde_json::from_str::<serde_json::Value>(raw).is_err());

        let repaired = repair_json_surrogates(raw);
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["content"], "a\u{FFFD}b\u{FFFD}c");
    }

    #[test]
    fn repair_handles_truncated_escape() {
        let raw = r#"{"content": "\ud83"#;
        assert!(matches!(repair_json_surrogates(raw), Cow::Borrowed(_)));
    }
}
