//! Incremental UTF-8 decoding of raw PTY reads.
//!
//! A read can end in the middle of a multi-byte character. The incomplete
//! tail is held back and prepended to the next read so glyphs such as `❯`
//! reach the classifier intact.

/// Longest incomplete sequence that can be held back
const MAX_CARRY: usize = 3;

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode everything up to the last complete character.
    ///
    /// Bytes that are invalid rather than incomplete are replaced with U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let complete = self.carry.len() - incomplete_tail_len(&self.carry);
        let text = String::from_utf8_lossy(&self.carry[..complete]).into_owned();
        self.carry.drain(..complete);
        text
    }

    /// Bytes waiting for the rest of their character
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }

    pub fn reset(&mut self) {
        self.carry.clear();
    }
}

// Length of a trailing lead byte plus continuations that still lack bytes.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(MAX_CARRY) {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_glyph_split_across_reads() {
        let bytes = "a❯ 1. Yes".as_bytes();
        // ❯ is three bytes starting at index 1
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&bytes[..2]), "a");
        assert_eq!(decoder.pending().len(), 1);
        assert_eq!(decoder.decode(&bytes[2..3]), "");
        assert_eq!(decoder.decode(&bytes[3..]), "❯ 1. Yes");
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_four_byte_char_split() {
        let bytes = "ok 🎉".as_bytes();
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&bytes[..5]), "ok ");
        assert_eq!(decoder.decode(&bytes[5..]), "🎉");
    }

    #[test]
    fn test_invalid_bytes_are_replaced_not_held() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
        assert!(decoder.pending().is_empty());

        // Stray continuation bytes are not a held-back prefix
        assert_eq!(decoder.decode(&[0x80, 0x80, 0x80, 0x80]), "\u{FFFD}".repeat(4));
    }

    #[test]
    fn test_reset_drops_pending_bytes() {
        let mut decoder = Utf8Decoder::new();
        decoder.decode(&"’".as_bytes()[..2]);
        assert_eq!(decoder.pending().len(), 2);

        decoder.reset();
        assert!(decoder.pending().is_empty());
        assert_eq!(decoder.decode(b"x"), "x");
    }
}
