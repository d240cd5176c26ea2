//! Incremental search-lattice store for a streaming speech decoder.
//!
//! Two pieces work together here. The [`search`] module holds the
//! backpointer table: an append-mostly record of partial-hypothesis
//! endpoints that is garbage-collected by reachability as the recognition
//! frontier advances, compacted, and renumbered without ever invalidating a
//! handle silently. The [`sync`] module holds the synchronized growable
//! array that lets the single producing search thread feed any number of
//! consumer threads, with storage trimmed exactly as fast as the slowest
//! live consumer allows.

pub mod config;
pub mod error;
pub mod metrics;
pub mod search;
pub mod sync;
pub mod types;
