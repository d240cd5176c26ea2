//! Synchronized growable array for one producer and N consumers.
//!
//! This module provides an append-only windowed buffer shared between a
//! single producing thread and any number of consuming threads. Consumers
//! block until the index they need has been appended, then release consumed
//! prefixes; storage below an index is trimmed once every live consumer has
//! released it, so memory stays bounded no matter how long the stream runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::{self, holders};
use crate::error::{LatticeError, Result};
use crate::metrics::record_trim;
use crate::types::Wait;

struct ArrayState<T> {
    elements: VecDeque<T>,
    counts: VecDeque<u8>,
    base_index: usize,
    final_index: Option<usize>,
    n_readers: usize,
    producer_alive: bool,
}

impl<T> ArrayState<T> {
    fn next_index(&self) -> usize {
        self.base_index + self.elements.len()
    }

    fn n_holders(&self) -> usize {
        self.n_readers + usize::from(self.producer_alive)
    }

    /// Trim the prefix released by every live reader. Returns the number of
    /// elements removed.
    fn trim(&mut self) -> usize {
        let quota = self.n_readers;
        let mut trimmed = 0;
        while let Some(&count) = self.counts.front() {
            if (count as usize) < quota {
                break;
            }
            self.counts.pop_front();
            self.elements.pop_front();
            self.base_index += 1;
            trimmed += 1;
        }
        trimmed
    }
}

struct Shared<T> {
    state: Mutex<ArrayState<T>>,
    grown: Condvar,
}

fn check_ready<T: Clone>(state: &ArrayState<T>, index: usize) -> Option<Wait<T>> {
    if index < state.next_index() {
        // A trimmed index was released by this reader already; the element
        // is gone for good, which is indistinguishable from end-of-stream.
        return Some(if index >= state.base_index {
            Wait::Ready(state.elements[index - state.base_index].clone())
        } else {
            Wait::Ended
        });
    }
    if let Some(final_index) = state.final_index {
        if index >= final_index {
            return Some(Wait::Ended);
        }
    }
    None
}

/// Snapshot of a synchronized array's window and holder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayStats {
    /// Smallest global index still present.
    pub base_index: usize,
    /// One past the last appended global index.
    pub next_index: usize,
    /// Append cursor frozen by finalization, if any.
    pub final_index: Option<usize>,
    /// Live holders (producer plus readers).
    pub n_holders: usize,
}

/// Producer handle to a synchronized array.
///
/// Dropping the producer finalizes the array if that has not happened yet,
/// so consumers can never block forever on a stream that stopped growing.
pub struct SyncArray<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer handle to a synchronized array.
///
/// Each reader tracks how far it has released; an index is trimmed from the
/// shared window once every live reader has released it.
pub struct SyncArrayReader<T> {
    shared: Arc<Shared<T>>,
    released_up_to: usize,
}

impl<T> SyncArray<T> {
    /// Create a new array with the given initial window capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ArrayState {
                    elements: VecDeque::with_capacity(capacity),
                    counts: VecDeque::with_capacity(capacity),
                    base_index: 0,
                    final_index: None,
                    n_readers: 0,
                    producer_alive: true,
                }),
                grown: Condvar::new(),
            }),
        }
    }

    /// Create a consumer handle for this array.
    ///
    /// Fails once the holder ceiling is reached; that many concurrent
    /// holders is a caller bug, not a retriable condition.
    pub fn reader(&self) -> Result<SyncArrayReader<T>> {
        let mut state = self.shared.state.lock();
        if state.n_holders() >= holders::MAX_HOLDERS {
            return Err(LatticeError::HolderLimit {
                limit: holders::MAX_HOLDERS,
            });
        }
        state.n_readers += 1;
        let released_up_to = state.base_index;
        drop(state);

        Ok(SyncArrayReader {
            shared: Arc::clone(&self.shared),
            released_up_to,
        })
    }

    /// Append an element and wake all waiting consumers.
    ///
    /// # Returns
    /// The element's global index, or an error once the array is finalized.
    pub fn append(&self, element: T) -> Result<usize> {
        let mut state = self.shared.state.lock();
        if let Some(final_index) = state.final_index {
            return Err(LatticeError::Finalized(format!(
                "append rejected at index {}",
                final_index
            )));
        }
        let index = state.next_index();
        state.elements.push_back(element);
        state.counts.push_back(0);
        drop(state);

        self.shared.grown.notify_all();
        Ok(index)
    }

    /// Close the array to further appends and wake all waiting consumers.
    ///
    /// # Returns
    /// The frozen append cursor. A second call fails and changes nothing.
    pub fn finalize(&self) -> Result<usize> {
        let mut state = self.shared.state.lock();
        if state.final_index.is_some() {
            return Err(LatticeError::AlreadyFinalized(
                "synchronized array".to_string(),
            ));
        }
        let final_index = state.next_index();
        state.final_index = Some(final_index);
        drop(state);

        self.shared.grown.notify_all();
        Ok(final_index)
    }

    /// Snapshot the current window and holder state.
    pub fn stats(&self) -> ArrayStats {
        let state = self.shared.state.lock();
        ArrayStats {
            base_index: state.base_index,
            next_index: state.next_index(),
            final_index: state.final_index,
            n_holders: state.n_holders(),
        }
    }
}

impl<T> Default for SyncArray<T> {
    fn default() -> Self {
        Self::new(config::global().array_capacity)
    }
}

impl<T> Drop for SyncArray<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.producer_alive = false;
        if state.final_index.is_none() {
            state.final_index = Some(state.next_index());
        }
        drop(state);
        self.shared.grown.notify_all();
    }
}

impl<T> SyncArrayReader<T> {
    /// Copy out the element at a global index, if it is currently present.
    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        let state = self.shared.state.lock();
        if index < state.base_index {
            return None;
        }
        state.elements.get(index - state.base_index).cloned()
    }

    /// Block until the element at `index` is available, the array ends, or
    /// the timeout elapses.
    ///
    /// # Arguments
    /// * `index` - Global index to wait for.
    /// * `timeout` - Deadline for the wait; `None` blocks until woken.
    ///
    /// # Returns
    /// `Ready` with a copy of the element, `Ended` once the element can
    /// never be observed (finalized before `index`, or already released and
    /// trimmed), or `TimedOut`.
    pub fn wait(&self, index: usize, timeout: Option<Duration>) -> Wait<T>
    where
        T: Clone,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        loop {
            if let Some(result) = check_ready(&state, index) {
                return result;
            }
            match deadline {
                None => self.shared.grown.wait(&mut state),
                Some(deadline) => {
                    if self.shared.grown.wait_until(&mut state, deadline).timed_out() {
                        return check_ready(&state, index).unwrap_or(Wait::TimedOut);
                    }
                }
            }
        }
    }

    /// Declare this reader done with every index below `up_to`.
    ///
    /// Releases are cumulative and idempotent: indices this reader already
    /// released are skipped. Once every live reader has released an index,
    /// the window below it is trimmed.
    ///
    /// # Returns
    /// The new base index after any trim.
    pub fn release(&mut self, up_to: usize) -> usize {
        let mut state = self.shared.state.lock();
        let hi = up_to.min(state.next_index());
        for index in self.released_up_to..hi {
            let offset = index - state.base_index;
            state.counts[offset] = state.counts[offset].saturating_add(1);
        }
        if hi > self.released_up_to {
            self.released_up_to = hi;
        }
        let trimmed = state.trim();
        if trimmed > 0 {
            record_trim(trimmed);
        }
        state.base_index
    }

    /// Snapshot the current window and holder state.
    pub fn stats(&self) -> ArrayStats {
        let state = self.shared.state.lock();
        ArrayStats {
            base_index: state.base_index,
            next_index: state.next_index(),
            final_index: state.final_index,
            n_holders: state.n_holders(),
        }
    }
}

impl<T> Drop for SyncArrayReader<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        // Retract this reader's release counts so a dead reader neither
        // gates the window nor forces it out from under live readers.
        for index in state.base_index..self.released_up_to {
            let offset = index - state.base_index;
            state.counts[offset] = state.counts[offset].saturating_sub(1);
        }
        state.n_readers -= 1;
        let trimmed = state.trim();
        if trimmed > 0 {
            record_trim(trimmed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_append_and_get() {
        let array = SyncArray::new(4);
        let reader = array.reader().unwrap();
        for value in 0..5 {
            assert_eq!(array.append(value).unwrap(), value as usize);
        }
        assert_eq!(reader.get(0), Some(0));
        assert_eq!(reader.get(4), Some(4));
        assert_eq!(reader.get(5), None);
        assert_eq!(array.stats().next_index, 5);
        assert_eq!(array.stats().base_index, 0);
    }

    #[test]
    fn test_append_after_finalize_rejected() {
        let array = SyncArray::new(4);
        array.append(1).unwrap();
        assert_eq!(array.finalize().unwrap(), 1);
        assert!(matches!(
            array.append(2),
            Err(LatticeError::Finalized(_))
        ));
        assert_eq!(array.stats().next_index, 1);
    }

    #[test]
    fn test_double_finalize_rejected() {
        let array = SyncArray::<i32>::new(4);
        array.finalize().unwrap();
        assert!(matches!(
            array.finalize(),
            Err(LatticeError::AlreadyFinalized(_))
        ));
    }

    #[test]
    fn test_holder_ceiling() {
        let array = SyncArray::<i32>::new(1);
        let mut readers = Vec::new();
        // Producer occupies one holder slot, so 254 readers fit.
        for _ in 0..(holders::MAX_HOLDERS - 1) {
            readers.push(array.reader().unwrap());
        }
        assert!(matches!(
            array.reader(),
            Err(LatticeError::HolderLimit { .. })
        ));
        readers.pop();
        assert!(array.reader().is_ok());
    }

    #[test]
    fn test_release_trims_when_all_readers_release() {
        let array = SyncArray::new(8);
        let mut first = array.reader().unwrap();
        let mut second = array.reader().unwrap();
        for value in 0..6 {
            array.append(value).unwrap();
        }

        assert_eq!(first.release(3), 0);
        assert_eq!(second.release(3), 3);
        assert_eq!(first.get(2), None);
        assert_eq!(first.get(3), Some(3));
        assert_eq!(array.stats().base_index, 3);
    }

    #[test]
    fn test_release_is_idempotent() {
        let array = SyncArray::new(8);
        let mut first = array.reader().unwrap();
        let second = array.reader().unwrap();
        for value in 0..4 {
            array.append(value).unwrap();
        }

        // Repeated releases of the same prefix count once.
        first.release(2);
        first.release(2);
        first.release(2);
        assert_eq!(array.stats().base_index, 0);
        drop(second);
        assert_eq!(array.stats().base_index, 2);
    }

    #[test]
    fn test_dead_reader_stops_gating_but_never_force_trims() {
        let array = SyncArray::new(8);
        let mut releasing = array.reader().unwrap();
        let holding = array.reader().unwrap();
        for value in 0..4 {
            array.append(value).unwrap();
        }

        // A reader that released everything then died must not cause a trim
        // out from under the reader that still needs the window.
        releasing.release(4);
        drop(releasing);
        assert_eq!(array.stats().base_index, 0);
        assert_eq!(holding.get(0), Some(0));

        // A reader that never released anything stops gating once dropped.
        let mut last = array.reader().unwrap();
        last.release(4);
        drop(holding);
        assert_eq!(array.stats().base_index, 4);
        drop(last);
    }

    #[test]
    fn test_wait_timeout_on_empty() {
        let array = SyncArray::<i32>::new(4);
        let reader = array.reader().unwrap();
        let result = reader.wait(0, Some(Duration::from_millis(10)));
        assert!(result.is_timed_out());
    }

    #[test]
    fn test_wait_returns_ended_past_final() {
        let array = SyncArray::new(4);
        let reader = array.reader().unwrap();
        array.append(7).unwrap();
        array.finalize().unwrap();
        assert_eq!(reader.wait(0, None), Wait::Ready(7));
        assert!(reader.wait(1, None).is_ended());
        assert!(reader.wait(100, Some(Duration::from_secs(5))).is_ended());
    }

    #[test]
    fn test_dropping_producer_unblocks_waiters() {
        let array = SyncArray::new(4);
        let reader = array.reader().unwrap();
        array.append(1).unwrap();

        let waiter = thread::spawn(move || reader.wait(5, None));
        drop(array);
        assert!(waiter.join().unwrap().is_ended());
    }

    #[test]
    fn test_wait_wakes_on_append() {
        let array = SyncArray::new(4);
        let reader = array.reader().unwrap();

        let waiter = thread::spawn(move || reader.wait(0, None));
        thread::sleep(Duration::from_millis(20));
        array.append(99).unwrap();
        assert_eq!(waiter.join().unwrap(), Wait::Ready(99));
    }

    #[test]
    fn test_staggered_consumers_drain_stream() {
        const N_READERS: usize = 10;
        const N_ELEMENTS: usize = 20;

        let array = SyncArray::new(4);
        let mut handles = Vec::new();
        for reader_no in 0..N_READERS {
            let mut reader = array.reader().unwrap();
            handles.push(thread::spawn(move || {
                // Stagger startup so some readers begin mid-stream.
                thread::sleep(Duration::from_millis(reader_no as u64));
                let mut seen = Vec::new();
                let mut index = 0;
                loop {
                    match reader.wait(index, None) {
                        Wait::Ready(value) => {
                            seen.push(value);
                            reader.release(index + 1);
                            index += 1;
                        }
                        Wait::Ended => break,
                        Wait::TimedOut => unreachable!("infinite wait cannot time out"),
                    }
                }
                seen
            }));
        }

        for value in 0..N_ELEMENTS {
            array.append(value).unwrap();
        }
        array.finalize().unwrap();

        for handle in handles {
            let seen = handle.join().unwrap();
            assert_eq!(seen, (0..N_ELEMENTS).collect::<Vec<_>>());
        }

        // Every reader released everything and exited, so the whole window
        // is trimmed.
        let stats = array.stats();
        assert_eq!(stats.base_index, N_ELEMENTS);
        assert_eq!(stats.next_index, N_ELEMENTS);
        assert_eq!(stats.n_holders, 1);
    }
}
