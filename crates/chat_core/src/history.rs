//! crates/chat_core/src/history.rs
//!
//! Bounded chat history: a session keeps only its most recent turns.

use crate::domain::{Session, Turn};

/// Maximum turns kept per session. Older turns are dropped, not archived.
pub const HISTORY_LIMIT: usize = 400;

impl Session {
    /// Appends a turn, dropping from the front past `HISTORY_LIMIT`.
    pub fn append(&mut self, turn: Turn) {
        self.history.push(turn);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    /// Empties the history; the session itself stays.
    pub fn clear(&mut self) {
        self.history.clear();
    }
}
