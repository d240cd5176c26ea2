//! Strong typing with newtypes for domain concepts.
//!
//! This module provides type-safe wrappers around the primitive quantities of
//! the search lattice to prevent common errors and provide better API design
//! through the type system.

use serde::{Deserialize, Serialize};

/// Word identifier assigned by the external dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WordId(pub i32);

impl WordId {
    /// Create a new word identifier.
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    /// Get the word identifier value.
    pub fn value(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for WordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "word_{}", self.0)
    }
}

/// One discrete time step of the input being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Frame(pub i32);

impl Frame {
    /// Sentinel for "no frame yet" (an empty table reports this).
    pub const NONE: Self = Self(-1);

    /// Create a new frame number.
    pub fn new(frame: i32) -> Self {
        Self(frame)
    }

    /// Get the frame number.
    pub fn value(self) -> i32 {
        self.0
    }

    /// Check whether this is the "no frame yet" sentinel.
    pub fn is_none(self) -> bool {
        self.0 < 0
    }

    /// The frame following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame {}", self.0)
    }
}

/// Additive log-domain path score.
///
/// Scores only ever merge monotonically: a recombination keeps the larger
/// score, so comparisons are total and overflow-free in practice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Score(pub i32);

impl Score {
    /// The zero score (an empty path).
    pub const ZERO: Self = Self(0);

    /// Create a new score.
    pub fn new(score: i32) -> Self {
        Self(score)
    }

    /// Get the score value.
    pub fn value(self) -> i32 {
        self.0
    }

    /// The score contribution of this path segment relative to `prev`.
    pub fn delta(self, prev: Self) -> Self {
        Self(self.0 - prev.0)
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque language-model context carried through the table for scoring
/// continuity. The lattice store never interprets it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct LmState(pub u64);

impl LmState {
    /// Create a new language-model context token.
    pub fn new(state: u64) -> Self {
        Self(state)
    }

    /// Get the raw context value.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Generation-tagged handle to a backpointer entry.
///
/// The index alone is not stable across garbage collection; the generation
/// tag lets the table detect a handle that refers to an entry that has been
/// renumbered or discarded, instead of silently reading shifted data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BpId {
    /// Global entry index at the time the handle was issued.
    pub index: u32,
    /// Table generation at the time the handle was issued.
    pub generation: u32,
}

impl BpId {
    /// Create a handle from raw parts.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl std::fmt::Display for BpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@g{}", self.index, self.generation)
    }
}

/// Outcome of a blocking wait.
///
/// A timeout is routine control flow for pollers, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wait<T> {
    /// The awaited data arrived.
    Ready(T),
    /// The structure was finalized; the awaited data will never arrive.
    Ended,
    /// The deadline elapsed first.
    TimedOut,
}

impl<T> Wait<T> {
    /// Get the ready value, or `None` for `Ended`/`TimedOut`.
    pub fn ready(self) -> Option<T> {
        match self {
            Wait::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Check whether the structure reported end-of-data.
    pub fn is_ended(&self) -> bool {
        matches!(self, Wait::Ended)
    }

    /// Check whether the deadline elapsed.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Wait::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sentinel() {
        assert!(Frame::NONE.is_none());
        assert!(!Frame::new(0).is_none());
        assert_eq!(Frame::new(3).next(), Frame::new(4));
    }

    #[test]
    fn test_score_ordering_and_delta() {
        assert!(Score::new(14) > Score::new(6));
        assert_eq!(Score::new(14).delta(Score::new(6)), Score::new(8));
        assert_eq!(Score::ZERO.value(), 0);
    }

    #[test]
    fn test_bp_id_display() {
        let id = BpId::new(3, 2);
        assert_eq!(id.to_string(), "3@g2");
    }

    #[test]
    fn test_wait_accessors() {
        assert_eq!(Wait::Ready(7).ready(), Some(7));
        assert_eq!(Wait::<i32>::Ended.ready(), None);
        assert!(Wait::<i32>::Ended.is_ended());
        assert!(Wait::<i32>::TimedOut.is_timed_out());
    }
}
