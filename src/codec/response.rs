//! Script rewriting and response normalization.
//!
//! Scripts that are a single expression are rewritten so the REPL prints the
//! result as one JSON string. Lazy sequences are materialized first. The text
//! that comes back is cleaned of prompt lines before it reaches the caller.

use std::sync::Arc;

use crate::codec::{DialectKind, ReplDialect, UNWRAP_HELPER};
use crate::shell::ShellError;

/// Default cap on materialized lazy-sequence items.
pub const DEFAULT_LAZY_CAP: u32 = 50;

/// Shell helper commands that are not JavaScript expressions.
const SHELL_COMMANDS: &[&str] = &["use", "show", "it", "exit", "quit", "help", "cls"];

/// Keywords that open a declaration or control statement, never a value.
const STATEMENT_KEYWORDS: &[&str] = &[
    "var", "let", "const", "function", "class", "if", "for", "while", "do", "try",
    "switch", "return", "throw", "break", "continue",
];

/// Encodes scripts for, and decodes responses from, one REPL dialect.
#[derive(Debug, Clone)]
pub struct ResponseCodec {
    dialect: Arc<dyn ReplDialect>,
    lazy_cap: u32,
}

impl Default for ResponseCodec {
    fn default() -> Self {
        Self::new(DialectKind::default().dialect())
    }
}

impl ResponseCodec {
    #[must_use]
    pub fn new(dialect: Arc<dyn ReplDialect>) -> Self {
        Self {
            dialect,
            lazy_cap: DEFAULT_LAZY_CAP,
        }
    }

    #[must_use]
    pub fn with_lazy_cap(mut self, cap: u32) -> Self {
        self.lazy_cap = cap;
        self
    }

    #[must_use]
    pub fn dialect(&self) -> &dyn ReplDialect {
        self.dialect.as_ref()
    }

    /// Script installing the lazy-sequence helper.
    #[must_use]
    pub fn helper_script(&self) -> String {
        self.dialect.helper_script(self.lazy_cap)
    }

    /// Script configuring the result batch size.
    #[must_use]
    pub fn config_script(&self, batch_size: u32) -> String {
        self.dialect.batch_size_script(batch_size)
    }

    /// Rewrite `script` so its value is printed as a single JSON string.
    ///
    /// Empty scripts, shell commands such as `use`, declarations and control
    /// statements, scripts that already print, and anything with more than
    /// one statement pass through as-is.
    #[must_use]
    pub fn encode(&self, script: &str) -> String {
        let trimmed = script.trim();
        let expression = trimmed.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        if expression.is_empty() {
            return String::new();
        }

        let emit = self.dialect.emit_fn();
        let already_wrapped =
            expression.starts_with(&format!("{emit}(")) || expression.contains(UNWRAP_HELPER);
        if already_wrapped
            || is_shell_command(expression)
            || is_statement(expression)
            || !is_single_expression(expression)
        {
            return trimmed.to_string();
        }

        format!(
            "{emit}({}({UNWRAP_HELPER}({expression})))",
            self.dialect.serialize_fn()
        )
    }

    /// Normalize raw REPL output: trim it and drop wrapping prompt lines.
    #[must_use]
    pub fn decode(&self, text: &str) -> String {
        let mut lines: Vec<&str> = text
            .trim_end()
            .lines()
            .skip_while(|line| line.trim().is_empty())
            .collect();

        if lines.first().is_some_and(|line| self.dialect.is_prompt(line)) {
            lines.remove(0);
        }
        if lines.last().is_some_and(|line| self.dialect.is_prompt(line)) {
            lines.pop();
        }

        lines.join("\n").trim_end().to_string()
    }

    /// Decode `text` and parse it as JSON. Empty output decodes to `null`.
    ///
    /// # Errors
    ///
    /// Returns `ShellError::Script` if the output is not valid JSON.
    pub fn decode_json(&self, text: &str) -> Result<serde_json::Value, ShellError> {
        let decoded = self.decode(text);
        if decoded.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&decoded)
            .map_err(|e| ShellError::Script(format!("could not parse shell output as JSON: {e}")))
    }
}

fn is_shell_command(expression: &str) -> bool {
    let first = expression.split_whitespace().next().unwrap_or_default();
    SHELL_COMMANDS.contains(&first)
        && (first.len() == expression.len()
            || expression[first.len()..].starts_with(char::is_whitespace))
}

fn is_statement(expression: &str) -> bool {
    let end = expression
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(expression.len());
    STATEMENT_KEYWORDS.contains(&&expression[..end])
}

/// Whether `source` is one expression: no top-level statement separators,
/// no comments, and balanced brackets.
fn is_single_expression(source: &str) -> bool {
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            ';' | '\n' if depth == 0 => return false,
            '/' if matches!(chars.peek(), Some('/' | '*')) => return false,
            _ => {}
        }
    }

    depth == 0 && quote.is_none()
}
