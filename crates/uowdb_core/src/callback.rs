//! Commit-boundary callbacks.

/// Outcome of a unit of work, reported to `after_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkStatus {
    /// All backends committed.
    Completed,
    /// The session was discarded; no backend committed.
    Discarded,
}

/// Listener notified around a session's commit boundary.
///
/// Callbacks participate two ways: explicitly registered on the session
/// via [`crate::UnitOfWork::add_callback`], or attached to a cached
/// entity instance, in which case they are discovered implicitly at
/// completion (removed instances excluded).
///
/// Callbacks must not call back into the owning session; the session is
/// single-owner and mid-completion when hooks run.
pub trait UnitOfWorkCallback: Send + Sync {
    /// Invoked after every backend has staged its changes, before any
    /// committer is told to commit.
    ///
    /// # Errors
    ///
    /// Returning an error vetoes the completion: every staged committer
    /// is cancelled and the session is discarded.
    fn before_completion(&self) -> crate::UowResult<()> {
        Ok(())
    }

    /// Invoked after the outcome is fixed.
    ///
    /// The signature is infallible on purpose: by the time after-hooks
    /// run, the commit either happened or it did not, and nothing a
    /// callback reports can change that.
    fn after_completion(&self, status: UnitOfWorkStatus) {
        let _ = status;
    }
}
