//! Bounded chat log: the last few chat lines and room announcements, oldest
//! first.

use std::collections::VecDeque;

/// How many lines the room keeps on screen.
pub const CHAT_LOG_CAPACITY: usize = 7;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Something a participant said.
    Message,
    /// A room announcement about a participant (joined / left).
    Notice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub speaker_name: String,
    pub text: String,
    pub kind: EntryKind,
}

impl ChatEntry {
    pub fn message(speaker_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker_name: speaker_name.into(),
            text: text.into(),
            kind: EntryKind::Message,
        }
    }

    pub fn joined(name: impl Into<String>) -> Self {
        Self {
            speaker_name: name.into(),
            text: "joined the room".into(),
            kind: EntryKind::Notice,
        }
    }

    pub fn left(name: impl Into<String>) -> Self {
        Self {
            speaker_name: name.into(),
            text: "left the room".into(),
            kind: EntryKind::Notice,
        }
    }
}

/// Display form handed to the presentation layer.
impl std::fmt::Display for ChatEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            EntryKind::Message => write!(f, "{}: {}", self.speaker_name, self.text),
            EntryKind::Notice => write!(f, "{} {}", self.speaker_name, self.text),
        }
    }
}

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

/// Fixed-capacity FIFO.  Appending past capacity evicts from the front.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `entry`, returning whatever was evicted to make room.
    pub fn append(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Entries oldest first, newest last.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &T> + '_ {
        self.entries.iter()
    }

    pub fn newest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> BoundedLog<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

pub type ChatLog = BoundedLog<ChatEntry>;

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(CHAT_LOG_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
