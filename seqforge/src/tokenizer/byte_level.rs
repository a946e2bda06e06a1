//! GPT-2 byte ↔ unicode table.
//!
//! Every byte maps to a printable code point: bytes that are already
//! printable Latin-1 map to themselves, the remaining 68 map to `U+0100..`
//! in byte order. The table must match the reference exactly or every
//! byte-level vocabulary breaks.

use std::collections::HashMap;
use std::sync::OnceLock;

fn build_bytes_to_unicode() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut next = 0u32;
    for b in 0..=255u8 {
        let printable = matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
        let cp = if printable {
            u32::from(b)
        } else {
            next += 1;
            255 + next
        };
        table[b as usize] = char::from_u32(cp).unwrap_or('\u{FFFD}');
    }
    table
}

/// Byte → printable char.
pub fn bytes_to_unicode() -> &'static [char; 256] {
    static TABLE: OnceLock<[char; 256]> = OnceLock::new();
    TABLE.get_or_init(build_bytes_to_unicode)
}

/// Printable char → byte.
pub fn unicode_to_bytes() -> &'static HashMap<char, u8> {
    static TABLE: OnceLock<HashMap<char, u8>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..=255u8)
            .map(|b| (bytes_to_unicode()[b as usize], b))
            .collect()
    })
}

/// Remap the UTF-8 bytes of `text` through [`bytes_to_unicode`].
#[must_use]
pub fn encode_bytes(text: &str) -> String {
    let table = bytes_to_unicode();
    text.bytes().map(|b| table[b as usize]).collect()
}

/// Inverse of [`encode_bytes`]. Chars outside the table contribute their own
/// UTF-8 bytes; invalid UTF-8 is replaced lossily.
#[must_use]
pub fn decode_bytes(text: &str) -> String {
    let table = unicode_to_bytes();
    let mut bytes = Vec::with_capacity(text.len());
    for ch in text.chars() {
        if let Some(&b) = table.get(&ch) {
            bytes.push(b);
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_mappings() {
        let t = bytes_to_unicode();
        assert_eq!(t[b'a' as usize], 'a');
        assert_eq!(t[b' ' as usize], 'Ġ');
        assert_eq!(t[b'\n' as usize], 'Ċ');
        assert_eq!(t[0], 'Ā');
        assert_eq!(t[0xAD], 'Ń');
    }

    #[test]
    fn test_table_is_bijective() {
        assert_eq!(unicode_to_bytes().len(), 256);
    }

    #[test]
    fn test_roundtrip_multibyte() {
        let text = "héllo wörld 🚀\n";
        assert_eq!(decode_bytes(&encode_bytes(text)), text);
        assert_eq!(encode_bytes(" hi"), "Ġhi");
    }
}
