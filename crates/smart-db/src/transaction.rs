//! Transaction Management
//!
//! Transactions nest by counting: only the outermost `start_trans` reaches
//! the backend, and only the matching outermost `commit` or `rollback` ends
//! it. Inner calls move the counter and nothing else.

/// Nesting counter owned by one driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionState {
    depth: usize,
}

impl TransactionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter one level; `true` when this call must begin on the backend
    pub fn enter(&mut self) -> bool {
        self.depth += 1;
        self.depth == 1
    }

    /// Leave one level; `true` when this call must end the transaction on
    /// the backend. Leaving at depth 0 is a no-op returning `false`.
    pub fn leave(&mut self) -> bool {
        match self.depth {
            0 => false,
            depth => {
                self.depth = depth - 1;
                self.depth == 0
            }
        }
    }

    /// Whether the next `leave` ends the transaction on the backend
    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }

    /// Undo an `enter` whose backend begin failed
    pub fn abandon(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Reads and writes are pinned to the master while this holds
    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_outermost_levels_reach_backend() {
        let mut state = TransactionState::new();
        assert!(state.enter());
        assert!(!state.enter());
        assert!(!state.enter());
        assert_eq!(state.depth(), 3);

        assert!(!state.leave());
        assert!(!state.leave());
        assert!(state.is_active());
        assert!(state.is_outermost());
        assert!(state.leave());
        assert!(!state.is_active());
    }

    #[test]
    fn test_leave_without_transaction() {
        let mut state = TransactionState::new();
        assert!(!state.leave());
        assert_eq!(state.depth(), 0);
    }

    #[test]
    fn test_abandon_restores_depth() {
        let mut state = TransactionState::new();
        assert!(state.enter());
        state.abandon();
        assert_eq!(state.depth(), 0);
        assert!(state.enter());
    }
}
