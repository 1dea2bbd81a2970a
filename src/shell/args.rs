//! Command-line arguments for the database shell.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Flag that makes the shell accept self-signed certificates (emulators).
pub const TLS_INSECURE_FLAG: &str = "--tlsAllowInvalidCertificates";

/// Flags whose following argument is a secret.
const SECRET_FLAGS: &[&str] = &["-p", "--password", "--apiKey"];

const MASK: &str = "****";

static URI_PASSWORD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    match Regex::new(r"(?i)(mongodb(?:\+srv)?://[^:/@\s]+:)[^@\s]+@") {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to compile credential pattern");
            None
        }
    }
});

/// Builder for the shell's argument list.
///
/// The connection target always ends up as the final positional argument.
#[derive(Debug, Clone, Default)]
pub struct ShellArgs {
    extra: Vec<String>,
    allow_invalid_certificates: bool,
    target: Option<String>,
}

impl ShellArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append user-configured arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra.extend(args.into_iter().map(Into::into));
        self
    }

    /// Accept self-signed certificates, e.g. for a local emulator.
    #[must_use]
    pub fn allow_invalid_certificates(mut self, allow: bool) -> Self {
        self.allow_invalid_certificates = allow;
        self
    }

    /// Set the connection string or host to connect to.
    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        let target = target.into();
        self.target = (!target.trim().is_empty()).then_some(target);
        self
    }

    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = self.extra.clone();

        if self.allow_invalid_certificates && !args.iter().any(|a| a == TLS_INSECURE_FLAG) {
            args.push(TLS_INSECURE_FLAG.to_string());
        }

        if let Some(target) = &self.target {
            args.push(target.clone());
        }

        args
    }
}

/// Mask the password in a MongoDB connection string.
#[must_use]
pub fn redact_credentials(arg: &str) -> Cow<'_, str> {
    match URI_PASSWORD.as_ref() {
        Some(re) => re.replace_all(arg, format!("${{1}}{MASK}@")),
        None => Cow::Borrowed(arg),
    }
}

/// Redact every argument, including values that follow secret flags.
#[must_use]
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            redacted.push(MASK.to_string());
            mask_next = false;
            continue;
        }
        mask_next = SECRET_FLAGS.contains(&arg.as_str());
        redacted.push(redact_credentials(arg).into_owned());
    }
    redacted
}
