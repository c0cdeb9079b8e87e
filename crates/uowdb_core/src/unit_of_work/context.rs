//! Execution-context-local session stack.

use crate::types::Usecase;
use crate::unit_of_work::UnitOfWork;
use uowdb_store::LogicalTime;

/// Ordered stack of nested units of work for one execution context.
///
/// This is the explicit replacement for a thread-local "current session"
/// singleton: callers own a context per thread or task of control and
/// thread it through their calls. The innermost open session is
/// [`SessionContext::current`].
///
/// The stack is mutated only at the sanctioned points: session creation
/// pushes, `complete`/`discard` pop, and `pause`/`resume` temporarily
/// remove and re-push. The context must not be shared across threads;
/// moving a *paused* session to another context is the supported
/// handoff.
#[derive(Default)]
pub struct SessionContext {
    stack: Vec<UnitOfWork>,
}

impl SessionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new unit of work and makes it current.
    pub fn new_unit_of_work(&mut self, usecase: Usecase, now: LogicalTime) -> UnitOfWork {
        let uow = UnitOfWork::new(usecase, now);
        tracing::debug!(usecase = %uow.usecase(), %now, depth = self.stack.len() + 1, "opened unit of work");
        self.stack.push(uow.clone());
        uow
    }

    /// Returns the innermost (current) session, if any.
    #[must_use]
    pub fn current(&self) -> Option<UnitOfWork> {
        self.stack.last().cloned()
    }

    /// Returns the number of stacked sessions.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn push(&mut self, uow: UnitOfWork) {
        self.stack.push(uow);
    }

    pub(crate) fn remove(&mut self, uow: &UnitOfWork) {
        if let Some(position) = self.stack.iter().rposition(|u| u.same_session(uow)) {
            self.stack.remove(position);
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("depth", &self.stack.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_becomes_current() {
        let mut ctx = SessionContext::new();
        assert!(ctx.current().is_none());

        let outer = ctx.new_unit_of_work(Usecase::new("outer"), LogicalTime::new(0));
        assert!(ctx.current().unwrap().same_session(&outer));

        let inner = ctx.new_unit_of_work(Usecase::new("inner"), LogicalTime::new(0));
        assert!(ctx.current().unwrap().same_session(&inner));
        assert_eq!(ctx.depth(), 2);

        inner.discard(&mut ctx);
        assert!(ctx.current().unwrap().same_session(&outer));
        outer.discard(&mut ctx);
        assert!(ctx.current().is_none());
    }
}
