//! Capped, ordered conversation log for one session.

use crate::turn::Turn;

/// Default number of turns a conversation keeps.
pub const HISTORY_LIMIT: usize = 24;

/// Ordered turns with FIFO eviction once `limit` is exceeded.
#[derive(Clone, Debug)]
pub struct History {
    turns: Vec<Turn>,
    limit: usize,
}

impl History {
    pub fn new() -> Self {
        Self::with_limit(HISTORY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            turns: Vec::with_capacity(limit.min(HISTORY_LIMIT) + 1),
            limit,
        }
    }

    /// Append to the tail, then drop from the head until `len() <= limit`.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        if self.turns.len() > self.limit {
            let excess = self.turns.len() - self.limit;
            self.turns.drain(..excess);
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}
