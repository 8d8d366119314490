//! Byte stream to console line decoding.
//!
//! Serial reads hand back arbitrary chunks: a line can arrive split over
//! several reads and one read can carry many lines. [`LineDecoder`] keeps
//! the unterminated tail between calls and emits complete lines only.
//!
//! `\r\n`, `\r` and `\n` all terminate a line. Only the terminator is
//! removed; the rest of the line is kept verbatim, padding included. Empty
//! lines are dropped, so a `\r\n` split across two reads never yields a
//! phantom empty line.

/// Longest unterminated tail kept before it is forced out as a line.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Incremental line splitter for console output.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw bytes, returning every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\r' || byte == b'\n' {
                self.flush_into(&mut lines);
            } else {
                self.pending.push(byte);
                if self.pending.len() >= MAX_PENDING_BYTES {
                    self.force_flush_into(&mut lines);
                }
            }
        }
        lines
    }

    /// Emit whatever unterminated text is left (used at shutdown).
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    /// Bytes held waiting for a terminator.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(line) = normalize_line(&self.pending) {
            lines.push(line);
        }
        self.pending.clear();
    }

    /// Emit an overlong tail without cutting a UTF-8 sequence in half; the
    /// incomplete character starts the next line.
    fn force_flush_into(&mut self, lines: &mut Vec<String>) {
        let keep = incomplete_utf8_tail(&self.pending);
        let carry = self.pending.split_off(self.pending.len() - keep);
        self.flush_into(lines);
        self.pending = carry;
    }
}

/// Length of a trailing, not yet complete UTF-8 sequence (0 if none).
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let byte = bytes[i];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        let have = bytes.len() - i;
        return if needed > have { have } else { 0 };
    }
    0
}

/// Decode one raw line (terminator already removed). Empty input is not a
/// line.
///
/// Invalid UTF-8 is replaced rather than rejected; consoles emit the odd
/// garbage byte after a reset.
#[must_use]
pub fn normalize_line(raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(raw).into_owned())
    }
}

/// Split a complete block of text into normalized lines.
#[must_use]
pub fn split_lines(text: &str) -> Vec<String> {
    let mut decoder = LineDecoder::new();
    let mut lines = decoder.push(text.as_bytes());
    lines.extend(decoder.finish());
    lines
}
