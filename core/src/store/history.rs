// Recent-message history replayed to newly admitted peers
//
// Bounded FIFO: insertion ordered, oldest entry dropped once full.
// Only chat lines are kept; notifications never reach this buffer.

use crate::envelope::ChatLine;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    capacity: usize,
    lines: VecDeque<ChatLine>,
}

impl HistoryBuffer {
    /// Create an empty buffer.
    ///
    /// A zero capacity is raised to one; configuration validation rejects
    /// zero before a server ever gets here. Storage grows on demand.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: VecDeque::new(),
        }
    }

    /// Append a line, returning the evicted oldest line if the buffer was full
    pub fn push(&mut self, line: ChatLine) -> Option<ChatLine> {
        let evicted = if self.lines.len() >= self.capacity {
            self.lines.pop_front()
        } else {
            None
        };
        self.lines.push_back(line);
        evicted
    }

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<ChatLine> {
        self.lines.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
