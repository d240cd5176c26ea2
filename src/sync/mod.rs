//! Producer/consumer synchronization primitives.
//!
//! The synchronized array is the channel between pipeline stages that run at
//! different speeds: one producer appends, any number of consumers read at
//! their own pace, and storage is reclaimed exactly as fast as the slowest
//! live consumer allows.

mod array;

pub use array::{ArrayStats, SyncArray, SyncArrayReader};
