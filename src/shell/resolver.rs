//! Locating the database shell executable.
//!
//! The last successfully resolved path is cached on the resolver itself.
//! Construct one resolver per application and pass it by reference.

use std::sync::Mutex;

/// Executables tried, in order, when nothing is configured.
pub const DEFAULT_CANDIDATES: &[&str] = &["mongosh", "mongo"];

/// Errors from executable resolution.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Nothing was found and the user declined to pick a path.
    #[error("no database shell executable was selected")]
    UserCancelled,
}

/// Asks the user for an executable path when none can be found.
pub trait PathPrompt {
    /// Return a path, or `None` if the user cancelled.
    fn prompt_for_path(&self, candidates: &[String]) -> Option<String>;
}

/// Prompt that always cancels; for non-interactive use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl PathPrompt for NoPrompt {
    fn prompt_for_path(&self, _candidates: &[String]) -> Option<String> {
        None
    }
}

/// Resolves and caches the shell executable.
#[derive(Debug)]
pub struct ExecutableResolver {
    candidates: Vec<String>,
    cached: Mutex<Option<String>>,
}

impl Default for ExecutableResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutableResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::with_candidates(DEFAULT_CANDIDATES.iter().copied())
    }

    #[must_use]
    pub fn with_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
            cached: Mutex::new(None),
        }
    }

    /// Resolve the executable to run.
    ///
    /// A configured `settings_path` always wins. Otherwise the cached result is
    /// reused, then the candidates are looked up on the search path, and as a
    /// last resort the user is prompted. Search-path hits are returned as bare
    /// command names.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::UserCancelled` if the prompt yields nothing.
    pub fn resolve(
        &self,
        settings_path: Option<&str>,
        prompt: &dyn PathPrompt,
    ) -> Result<String, ResolveError> {
        if let Some(path) = settings_path.map(str::trim).filter(|p| !p.is_empty()) {
            tracing::debug!(path, "Using configured shell path");
            return Ok(path.to_string());
        }

        if let Some(cached) = self.cached() {
            return Ok(cached);
        }

        let found = self
            .candidates
            .iter()
            .find(|candidate| which::which(candidate.as_str()).is_ok())
            .cloned();

        let resolved = match found {
            Some(command) => {
                tracing::debug!(command = %command, "Found shell on search path");
                command
            }
            None => prompt
                .prompt_for_path(&self.candidates)
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .ok_or(ResolveError::UserCancelled)?,
        };

        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(resolved.clone());
        }
        Ok(resolved)
    }

    /// The cached executable, if one was resolved before.
    #[must_use]
    pub fn cached(&self) -> Option<String> {
        self.cached.lock().ok().and_then(|cached| cached.clone())
    }

    /// Forget the cached executable, e.g. after it failed to start.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }
}
