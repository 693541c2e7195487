//! [`ConversationBuffer`] – bounded FIFO of recent turns.
//!
//! The buffer is the short-term tier: it keeps the last `capacity` turns
//! verbatim so they can be replayed to the model, and forgets everything on
//! restart.  Durability lives in the core and archival stores.
//!
//! # Example
//!
//! ```rust
//! use memos_memory::buffer::ConversationBuffer;
//! use memos_types::Role;
//!
//! let mut buffer = ConversationBuffer::new(2);
//! buffer.push(Role::User, "hi");
//! buffer.push(Role::Assistant, "hello!");
//! buffer.push(Role::User, "how are you?"); // evicts "hi"
//!
//! assert_eq!(buffer.len(), 2);
//! assert_eq!(buffer.turns().next().unwrap().content, "hello!");
//! ```

use std::collections::VecDeque;

use memos_types::{ConversationTurn, Role};

/// Default number of turns kept in memory.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10;

/// Fixed-capacity rolling window of [`ConversationTurn`]s.
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    capacity: usize,
    history: VecDeque<ConversationTurn>,
}

impl ConversationBuffer {
    /// Create an empty buffer.  A `capacity` of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a turn, evicting the oldest ones on overflow.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.history.push_back(ConversationTurn::new(role, content));
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    /// Iterate over the buffered turns, oldest first.
    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> + ExactSizeIterator {
        self.history.iter()
    }

    /// The most recent `n` turns, oldest first.
    pub fn last(&self, n: usize) -> impl Iterator<Item = &ConversationTurn> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl Default for ConversationBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleventh_push_evicts_the_first_turn() {
        let mut buffer = ConversationBuffer::default();
        for i in 0..11 {
            buffer.push(Role::User, format!("turn {i}"));
        }
        assert_eq!(buffer.len(), 10);
        let contents: Vec<_> = buffer.turns().map(|t| t.content.clone()).collect();
        let expected: Vec<_> = (1..11).map(|i| format!("turn {i}")).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn below_capacity_nothing_is_evicted() {
        let mut buffer = ConversationBuffer::new(4);
        buffer.push(Role::User, "a");
        buffer.push(Role::Assistant, "b");
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.turns().next().unwrap().role, Role::User);
    }

    #[test]
    fn last_returns_most_recent_in_order() {
        let mut buffer = ConversationBuffer::new(5);
        for c in ["a", "b", "c"] {
            buffer.push(Role::User, c);
        }
        let tail: Vec<_> = buffer.last(2).map(|t| t.content.as_str()).collect();
        assert_eq!(tail, vec!["b", "c"]);
        assert_eq!(buffer.last(10).count(), 3);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut buffer = ConversationBuffer::new(0);
        buffer.push(Role::User, "x");
        buffer.push(Role::User, "y");
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.turns().next().unwrap().content, "y");
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut buffer = ConversationBuffer::default();
        buffer.push(Role::User, "x");
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
