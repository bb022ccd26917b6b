//! Token byte accumulation
//!
//! Detokenized pieces are raw bytes and may end mid-way through a multi-byte
//! UTF-8 sequence. The accumulator buffers incoming bytes and only ever
//! releases the longest valid prefix, so callers never see a torn code point.
//! Standard UTF-8 of any width passes through, including 4-byte sequences
//! above U+FFFF.

/// Buffers raw model-output bytes and yields valid UTF-8 as it completes.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(64),
        }
    }

    /// Appends a detokenized piece and returns whatever text became complete.
    ///
    /// Returns an empty string while the buffer still ends in an incomplete
    /// sequence. Definitely-invalid bytes are dropped rather than allowed to
    /// wedge the stream.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        self.drain_valid()
    }

    /// Releases any remaining complete text and discards an unfinished tail.
    pub fn finish(&mut self) -> String {
        let out = self.drain_valid();
        if !self.pending.is_empty() {
            tracing::debug!(
                "discarding {} trailing incomplete byte(s)",
                self.pending.len()
            );
            self.pending.clear();
        }
        out
    }

    /// Bytes currently held back waiting for a sequence to complete.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn drain_valid(&mut self) -> String {
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if valid > 0 {
                        let taken: Vec<u8> = self.pending.drain(..valid).collect();
                        // Checked valid above.
                        out.push_str(std::str::from_utf8(&taken).unwrap_or_default());
                    }
                    match e.error_len() {
                        // Incomplete sequence at the end; wait for more bytes.
                        None => return out,
                        // Invalid sequence; skip it and keep scanning.
                        Some(bad) => {
                            tracing::debug!("skipping {bad} invalid byte(s) in model output");
                            self.pending.drain(..bad);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut acc = Utf8Accumulator::new();
        assert_eq!(acc.push(b"hello"), "hello");
        assert_eq!(acc.push(b" world"), " world");
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn test_four_byte_sequence_split_across_pieces() {
        // U+1F600 GRINNING FACE = f0 9f 98 80
        let mut acc = Utf8Accumulator::new();
        assert_eq!(acc.push(&[0xF0, 0x9F]), "");
        assert_eq!(acc.pending_len(), 2);
        assert_eq!(acc.push(&[0x98, 0x80]), "\u{1F600}");
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn test_text_before_incomplete_tail_is_released() {
        let mut acc = Utf8Accumulator::new();
        let mut piece = b"ok ".to_vec();
        piece.extend_from_slice(&[0xE2, 0x82]); // first 2 bytes of '€'
        assert_eq!(acc.push(&piece), "ok ");
        assert_eq!(acc.push(&[0xAC]), "\u{20AC}");
    }

    #[test]
    fn test_finish_discards_incomplete_tail() {
        let mut acc = Utf8Accumulator::new();
        acc.push(b"done");
        acc.push(&[0xF0, 0x9F]);
        assert_eq!(acc.finish(), "");
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn test_invalid_bytes_do_not_wedge_the_stream() {
        let mut acc = Utf8Accumulator::new();
        // 0xFF can never start a UTF-8 sequence.
        assert_eq!(acc.push(&[b'a', 0xFF, b'b']), "ab");
    }

    #[test]
    fn test_mixed_width_round_trip() {
        let text = "ASCII, caf\u{e9}, \u{65e5}\u{672c}, \u{1F680}\u{1F600}";
        let bytes = text.as_bytes();
        let mut acc = Utf8Accumulator::new();
        let mut out = String::new();
        // Feed one byte at a time, the worst case for torn sequences.
        for b in bytes {
            out.push_str(&acc.push(std::slice::from_ref(b)));
        }
        out.push_str(&acc.finish());
        assert_eq!(out, text);
    }
}
