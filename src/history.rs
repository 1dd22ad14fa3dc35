//! Bounded undo/redo over whole state values.

use std::collections::VecDeque;

/// Undo depth used by the engine.
pub const HISTORY_DEPTH: usize = 50;

pub struct History<T> {
    undo_stack: VecDeque<T>,
    redo_stack: VecDeque<T>,
    max_depth: usize,
}

impl<T> History<T> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_depth,
        }
    }

    /// Record the state as it was before a mutation. Drops the oldest entry
    /// when full and invalidates the redo stack.
    pub fn push(&mut self, previous: T) {
        if self.max_depth == 0 {
            return
        }
        if self.undo_stack.len() >= self.max_depth {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(previous);
        self.redo_stack.clear();
    }

    /// Swap `current` with the most recent undo entry. Returns false if
    /// there was nothing to undo.
    pub fn undo(&mut self, current: &mut T) -> bool {
        let Some(previous) = self.undo_stack.pop_back() else {
            return false
        };
        let undone = std::mem::replace(current, previous);
        self.redo_stack.push_back(undone);
        true
    }

    /// Swap `current` with the most recent redo entry. Returns false if
    /// there was nothing to redo.
    pub fn redo(&mut self, current: &mut T) -> bool {
        let Some(next) = self.redo_stack.pop_back() else {
            return false
        };
        let redone = std::mem::replace(current, next);
        self.undo_stack.push_back(redone);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }
}
