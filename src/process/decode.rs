//! Incremental decoding of pipe reads.
//!
//! A read can end in the middle of a multi-byte character, or in the middle
//! of a line. Both tails are held back until a later read completes them.

/// Longest possible UTF-8 sequence.
const MAX_CHAR_BYTES: usize = 4;

#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, keeping any incomplete trailing character for later.
    ///
    /// Invalid sequences are replaced with U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let keep = incomplete_tail_len(&self.pending);
        let split = self.pending.len() - keep;
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Splits decoded text into whole lines for the transcript.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` and return every line it completed, newlines included.
    pub fn push(&mut self, text: &str) -> Option<String> {
        let Some(last_newline) = text.rfind('\n') else {
            self.pending.push_str(text);
            return None;
        };
        let mut complete = std::mem::take(&mut self.pending);
        complete.push_str(&text[..=last_newline]);
        self.pending.push_str(&text[last_newline + 1..]);
        Some(complete)
    }

    /// Return the unterminated tail, if any, at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        (!self.pending.is_empty()).then(|| std::mem::take(&mut self.pending))
    }
}

/// Length of an incomplete but so-far-valid character at the end of `bytes`.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let window = bytes.len().min(MAX_CHAR_BYTES - 1);
    for back in 1..=window {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let expected = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => return 0,
        };
        return if back < expected { back } else { 0 };
    }
    0
}
