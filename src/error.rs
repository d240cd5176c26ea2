//! Custom error types for the lattice store.
//!
//! This module provides a centralized error handling system using the `thiserror`
//! crate to define structured, typed errors with clear messages. Every variant
//! corresponds to a caller protocol violation; none of them is retried internally.

use thiserror::Error;

use crate::types::{BpId, Frame};

/// Primary error type for the crate, covering all rejected operations.
#[derive(Debug, Error)]
pub enum LatticeError {
    /// Writes attempted after the structure was finalized.
    #[error("finalized: {0}")]
    Finalized(String),

    /// A second finalization attempt on an already-finalized structure.
    #[error("already finalized: {0}")]
    AlreadyFinalized(String),

    /// Too many concurrent holders of a synchronized array.
    #[error("holder limit of {limit} reached")]
    HolderLimit { limit: usize },

    /// An entry or query that requires a started frame, before any frame
    /// has been pushed.
    #[error("no frame open: {0}")]
    NoFrame(String),

    /// A backpointer entry whose end frame does not match the open frame,
    /// or a predecessor link that does not point to an earlier frame.
    #[error("entry ends at {got} but {expected} is open")]
    FrameMismatch { expected: Frame, got: Frame },

    /// A garbage-collection frontier outside the legal window.
    #[error("frontier {frontier} outside [{active}, {current}]")]
    InvalidFrontier {
        frontier: Frame,
        active: Frame,
        current: Frame,
    },

    /// A backpointer handle invalidated by compaction, renumbering, or reset.
    ///
    /// Distinct from every "valid but absent" case: a stale handle never
    /// silently resolves to a different entry.
    #[error("stale backpointer handle {id}")]
    StaleBp { id: BpId },

    /// Errors from invalid configuration values or sources.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results with LatticeError.
pub type Result<T> = std::result::Result<T, LatticeError>;
