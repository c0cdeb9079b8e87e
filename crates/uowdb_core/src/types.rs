//! Usecase descriptor for a unit of work.

use std::fmt;

/// Options governing a session's behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsecaseOptions {
    /// Prune unmodified (`Loaded`) instances from the cache when the
    /// session is paused, to bound memory while suspended.
    pub prune_on_pause: bool,
}

/// Describes the logical operation a unit of work executes.
///
/// The usecase name is handed to every backend transaction the session
/// opens; backends may record it for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usecase {
    name: String,
    options: UsecaseOptions,
}

impl Usecase {
    /// Creates a usecase with default options.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: UsecaseOptions::default(),
        }
    }

    /// Sets the session options.
    #[must_use]
    pub fn with_options(mut self, options: UsecaseOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the usecase name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the session options.
    #[must_use]
    pub fn options(&self) -> UsecaseOptions {
        self.options
    }
}

impl fmt::Display for Usecase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
