//! Time travel over a contract's log
//!
//! The navigator holds the current position (an entry hash) and a stack of
//! positions left behind by backward moves. Moving backward follows the
//! current entry's `parentHash`; moving forward pops the stack. Positions
//! only ever come from admitted entries or their parents, so the navigator
//! never points at an entry that is not in the log.

use crate::Result;

/// Position cursor plus offset stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Navigator {
    position: Option<String>,
    offset: Vec<String>,
}

impl Navigator {
    /// Empty navigator
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position
    pub fn position(&self) -> Option<&str> {
        self.position.as_deref()
    }

    /// Positions available to `move_forward`, oldest first
    pub fn offset(&self) -> &[String] {
        &self.offset
    }

    /// Jump to a position, discarding the offset stack
    pub fn set_position(&mut self, hash: impl Into<String>) {
        self.position = Some(hash.into());
        self.offset.clear();
    }

    /// Forget position and offset entirely
    pub fn reset(&mut self) {
        self.position = None;
        self.offset.clear();
    }

    /// Step to the parent of the current position
    ///
    /// `parent_of` resolves an entry hash to its parent hash. Returns
    /// `Ok(false)` without moving when there is no position or the current
    /// entry is the root.
    pub fn move_backward<F>(&mut self, parent_of: F) -> Result<bool>
    where
        F: FnOnce(&str) -> Result<Option<String>>,
    {
        let current = match self.position.as_deref() {
            Some(current) => current,
            None => return Ok(false),
        };

        match parent_of(current)? {
            Some(parent) => {
                if let Some(previous) = self.position.replace(parent) {
                    self.offset.push(previous);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Return to the position left by the last backward move
    ///
    /// Returns `false` when the offset stack is empty.
    pub fn move_forward(&mut self) -> bool {
        match self.offset.pop() {
            Some(next) => {
                self.position = Some(next);
                true
            }
            None => false,
        }
    }
}
