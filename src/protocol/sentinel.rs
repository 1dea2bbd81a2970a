//! Sentinel framing for an unframed REPL output stream.
//!
//! Each script is followed by a quoted string literal holding a random marker.
//! The REPL echoes the literal back once it has finished the script, so
//! everything in the stdout stream before the marker belongs to that script.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Fixed label every sentinel starts with.
pub const SENTINEL_PREFIX: &str = "EXECUTION COMPLETED ";

/// Number of random hex characters after the prefix (40 bits).
pub const SENTINEL_HEX_LEN: usize = 10;

/// Structural pattern matching any sentinel, used to scrub transcripts.
static ANY_SENTINEL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    let pattern = format!(
        r#"["']?{}[0-9a-fA-F]{{{SENTINEL_HEX_LEN}}}["']?"#,
        regex::escape(SENTINEL_PREFIX)
    );
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to compile sentinel scrub pattern");
            None
        }
    }
});

/// Marker that terminates one script execution's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sentinel {
    value: String,
}

impl Sentinel {
    /// Generate a fresh sentinel with a random hex suffix.
    #[must_use]
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self {
            value: format!("{SENTINEL_PREFIX}{}", &hex[..SENTINEL_HEX_LEN]),
        }
    }

    /// The raw sentinel text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The sentinel as a double-quoted string literal, as written to the REPL.
    #[must_use]
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.value)
    }

    /// Byte offset where this sentinel starts in `haystack`.
    ///
    /// Matching ignores ASCII case, and an opening quote directly before
    /// the marker counts as part of it.
    #[must_use]
    pub fn find_in(&self, haystack: &str) -> Option<usize> {
        // ASCII lowercasing keeps byte offsets intact.
        let lowered = haystack.to_ascii_lowercase();
        match_start(haystack, &lowered, &self.value.to_ascii_lowercase(), 0)
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Search `lowered` for `needle` from byte `from`, widening the match to an
/// opening quote found in `haystack` right before it.
fn match_start(haystack: &str, lowered: &str, needle: &str, from: usize) -> Option<usize> {
    let start = from + lowered[from..].find(needle)?;
    match haystack.as_bytes().get(start.wrapping_sub(1)) {
        Some(b'"' | b'\'') => Some(start - 1),
        _ => Some(start),
    }
}

/// Incremental sentinel search over a growing stdout buffer.
///
/// Each chunk is lowercased once as it arrives, and only the region where a
/// new match can start is searched. Scanning stays linear in the output size.
#[derive(Debug)]
pub struct SentinelScanner {
    needle: String,
    text: String,
    lowered: String,
}

impl SentinelScanner {
    #[must_use]
    pub fn new(sentinel: &Sentinel) -> Self {
        Self {
            needle: sentinel.value.to_ascii_lowercase(),
            text: String::new(),
            lowered: String::new(),
        }
    }

    /// Append `chunk`. Once the sentinel has arrived, returns everything
    /// before it.
    pub fn push(&mut self, chunk: &str) -> Option<&str> {
        let before = self.text.len();
        self.text.push_str(chunk);
        self.lowered.push_str(&chunk.to_ascii_lowercase());

        let mut from = before.saturating_sub(self.needle.len());
        while !self.lowered.is_char_boundary(from) {
            from -= 1;
        }
        let end = match_start(&self.text, &self.lowered, &self.needle, from)?;
        Some(&self.text[..end])
    }
}

/// The lines written to the REPL for one execution.
///
/// The sentinel goes on its own line so that a script that fails before
/// reaching its own output still gets the marker echoed back.
#[must_use]
pub fn frame_script(script: &str, sentinel: &Sentinel) -> [String; 2] {
    [script.to_string(), sentinel.quoted()]
}

/// Remove every sentinel-shaped marker from `text`.
#[must_use]
pub fn scrub_sentinels(text: &str) -> Cow<'_, str> {
    match ANY_SENTINEL.as_ref() {
        Some(re) => re.replace_all(text, ""),
        None => Cow::Borrowed(text),
    }
}
