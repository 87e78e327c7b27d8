//! Per-run cancellation tokens.
//!
//! `stop` cancels the run's token after the cancelled status is written; the
//! pipeline polls it between stages and between employees.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: DashMap<i64, CancellationToken>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `run_id`, created on first use
    pub fn register(&self, run_id: i64) -> CancellationToken {
        self.tokens.entry(run_id).or_default().clone()
    }

    /// Returns whether a live token was found
    pub fn cancel(&self, run_id: i64) -> bool {
        match self.tokens.get(&run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, run_id: i64) {
        self.tokens.remove(&run_id);
    }

    pub fn cancel_all(&self) {
        for entry in self.tokens.iter() {
            entry.value().cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_registered_token() {
        let registry = CancellationRegistry::new();
        let token = registry.register(7);
        assert!(!token.is_cancelled());

        assert!(registry.cancel(7));
        assert!(token.is_cancelled());
        assert!(!registry.cancel(8));
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = CancellationRegistry::new();
        let first = registry.register(1);
        let second = registry.register(1);
        registry.cancel_all();
        assert!(first.is_cancelled() && second.is_cancelled());

        registry.remove(1);
        assert!(registry.is_empty());
    }
}
