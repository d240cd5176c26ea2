//! Read-out types for decoded paths: entry views, hypotheses, and segments.

use serde::{Deserialize, Serialize};

use crate::types::{BpId, Frame, LmState, Score, WordId};

/// Copy-out view of one backpointer entry.
///
/// A snapshot taken under the table lock; the `id` is refreshed to the
/// current generation so it can be handed back to the table later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backpointer {
    /// Handle for re-resolving this entry.
    pub id: BpId,
    /// The word this entry records.
    pub word: WordId,
    /// Total path score up to and including this entry.
    pub score: Score,
    /// Frame at which the word ends.
    pub frame: Frame,
    /// Handle of the predecessor entry, if any.
    pub prev: Option<BpId>,
    /// Language-model context carried for the scorer.
    pub lm_state: LmState,
}

/// A decoded word sequence and its path score, first word to last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub words: Vec<WordId>,
    pub score: Score,
}

impl std::fmt::Display for Hypothesis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (position, word) in self.words.iter().enumerate() {
            if position > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", word.value())?;
        }
        Ok(())
    }
}

/// One word of a decoded path with its frame span and score breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub word: WordId,
    /// First frame of the word.
    pub start_frame: Frame,
    /// Last frame of the word.
    pub end_frame: Frame,
    /// Score this entry added over its predecessor.
    pub ascr: Score,
    /// Language-model score; always zero here, rescoring happens downstream.
    pub lscr: Score,
    /// Language-model backoff; always zero here.
    pub lm_backoff: Score,
    /// Context token recorded when the entry was last written.
    pub lm_state: LmState,
}

/// Forward iterator over the segments of one decoded path.
///
/// Single pass over a snapshot; ask the table again to re-walk.
#[derive(Debug)]
pub struct SegIter {
    segments: std::vec::IntoIter<Segment>,
}

impl SegIter {
    pub(crate) fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments: segments.into_iter(),
        }
    }
}

impl Iterator for SegIter {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        self.segments.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.segments.size_hint()
    }
}

impl ExactSizeIterator for SegIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hypothesis_display() {
        let hyp = Hypothesis {
            words: vec![WordId(3), WordId(1), WordId(4)],
            score: Score(42),
        };
        assert_eq!(hyp.to_string(), "3 1 4");
        assert_eq!(Hypothesis::default().to_string(), "");
    }

    #[test]
    fn test_seg_iter_is_exact_size() {
        let segment = Segment {
            word: WordId(1),
            start_frame: Frame(0),
            end_frame: Frame(2),
            ascr: Score(5),
            lscr: Score::ZERO,
            lm_backoff: Score::ZERO,
            lm_state: LmState::default(),
        };
        let mut iter = SegIter::new(vec![segment, segment]);
        assert_eq!(iter.len(), 2);
        assert_eq!(iter.next(), Some(segment));
        assert_eq!(iter.len(), 1);
    }
}
