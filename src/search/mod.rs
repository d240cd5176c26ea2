//! Incremental search-lattice storage.
//!
//! The backpointer table records partial-hypothesis endpoints as the search
//! advances frame by frame, garbage-collects the unreachable ones behind the
//! frontier, and serves word sequences and per-word segmentations back out.

mod bptbl;
mod hypothesis;

pub use bptbl::{BpTable, TableStats};
pub use hypothesis::{Backpointer, Hypothesis, SegIter, Segment};
