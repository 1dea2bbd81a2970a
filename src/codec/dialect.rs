//! REPL dialects: how each shell prints, serializes, and prompts.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Name of the REPL-side helper that materializes lazy sequences.
pub const UNWRAP_HELPER: &str = "__unwrapLazy";

/// Element appended when a lazy sequence had more items than the cap.
pub const TRUNCATION_MARKER: &str = "(more results truncated)";

/// Conventions of one REPL flavour.
pub trait ReplDialect: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Function that prints a value to stdout.
    fn emit_fn(&self) -> &'static str {
        "print"
    }

    /// Function that turns a value into a single JSON string.
    fn serialize_fn(&self) -> &'static str;

    /// Script that sets the shell's result batch size.
    fn batch_size_script(&self, batch_size: u32) -> String;

    /// Whether `line` is a REPL prompt rather than output.
    fn is_prompt(&self, line: &str) -> bool;

    /// One-line script defining [`UNWRAP_HELPER`].
    ///
    /// The helper turns anything with both `hasNext` and `next` into an array
    /// of at most `cap` items, plus [`TRUNCATION_MARKER`] if items remained.
    fn helper_script(&self, cap: u32) -> String {
        format!(
            "var {UNWRAP_HELPER} = function (value) {{ \
             if (value === null || typeof value !== 'object' \
             || typeof value.hasNext !== 'function' || typeof value.next !== 'function') {{ return value; }} \
             var items = []; \
             while (items.length < {cap} && value.hasNext()) {{ items.push(value.next()); }} \
             if (value.hasNext()) {{ items.push('{TRUNCATION_MARKER}'); }} \
             return items; }};"
        )
    }
}

/// Which dialect to speak, as named in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Mongosh,
    Legacy,
}

impl DialectKind {
    #[must_use]
    pub fn dialect(self) -> Arc<dyn ReplDialect> {
        match self {
            Self::Mongosh => Arc::new(Mongosh),
            Self::Legacy => Arc::new(LegacyMongo),
        }
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(error = %e, pattern, "Failed to compile prompt pattern");
            None
        }
    }
}

// `[direct: mongos] test>`, `Atlas atlas-x-shard-0 [primary] test>`, `test>`
static MONGOSH_PROMPT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"^\s*(?:(?:\S+\s+)*\[[^\]\r\n]+\]\s+)?[\w.$-]+>\s*$")
});

// `>`, `rs0:PRIMARY>`, `MongoDB Enterprise rs0:SECONDARY>`
static LEGACY_PROMPT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"^\s*(?:MongoDB Enterprise\s+)?(?:[\w.-]+:[A-Z]+)?>\s*$")
});

fn matches(pattern: &LazyLock<Option<Regex>>, line: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(line))
}

/// The current MongoDB shell, `mongosh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mongosh;

impl ReplDialect for Mongosh {
    fn name(&self) -> &'static str {
        "mongosh"
    }

    fn serialize_fn(&self) -> &'static str {
        "EJSON.stringify"
    }

    fn batch_size_script(&self, batch_size: u32) -> String {
        format!("config.set(\"displayBatchSize\", {batch_size})")
    }

    fn is_prompt(&self, line: &str) -> bool {
        matches(&MONGOSH_PROMPT, line)
    }
}

/// The legacy `mongo` shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyMongo;

impl ReplDialect for LegacyMongo {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn serialize_fn(&self) -> &'static str {
        "tojson"
    }

    fn batch_size_script(&self, batch_size: u32) -> String {
        format!("DBQuery.shellBatchSize = {batch_size}")
    }

    fn is_prompt(&self, line: &str) -> bool {
        matches(&LEGACY_PROMPT, line)
    }
}
