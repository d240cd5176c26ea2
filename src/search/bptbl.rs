//! Backpointer table for incremental Viterbi beam search.
//!
//! The table records, frame by frame, every surviving partial-hypothesis
//! endpoint produced by the search: word, end frame, predecessor link, and
//! additive log-domain score. Storage is split in two regions sharing one
//! global index space:
//!
//! * a *retired* prefix of entries that garbage collection has proven
//!   reachable and compacted; retired entries never move again,
//! * an *active* window of entries at or past the current frontier, which
//!   keep their global indices until a later pass retires or drops them.
//!
//! Between the regions lies a permanent gap of discarded indices. Each
//! `push_frame` runs the collection pass: entries behind the caller-supplied
//! frontier that no live chain references are dropped, the rest are renumbered
//! into the retired prefix and every surviving predecessor link is rewritten
//! under the same lock. Handles are generation-tagged so a handle left over
//! from before a pass that moved or dropped its entry fails loudly instead of
//! reading shifted data.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{self, LatticeConfig};
use crate::error::{LatticeError, Result};
use crate::metrics::{record_enter, record_finalize, record_frame, record_gc};
use crate::search::hypothesis::{Backpointer, Hypothesis, SegIter, Segment};
use crate::types::{BpId, Frame, LmState, Score, Wait, WordId};

/// Raw predecessor link value meaning "no predecessor".
const NO_PREV: i32 = -1;

/// One stored backpointer entry.
#[derive(Debug, Clone, Copy)]
struct BpEnt {
    word: WordId,
    score: Score,
    frame: Frame,
    prev: i32,
    lm_state: LmState,
}

struct TableState {
    retired: Vec<BpEnt>,
    active: Vec<BpEnt>,
    active_base: u32,
    frame_start: Vec<u32>,
    active_frame: Frame,
    generation: u32,
    epoch_generation: u32,
    retired_history: Vec<u32>,
    finalized: bool,
}

impl TableState {
    fn next_index(&self) -> u32 {
        self.active_base + self.active.len() as u32
    }

    fn frame_idx(&self) -> Frame {
        Frame(self.frame_start.len() as i32 - 1)
    }

    fn entry(&self, index: u32) -> Option<&BpEnt> {
        if (index as usize) < self.retired.len() {
            return self.retired.get(index as usize);
        }
        if index >= self.active_base {
            return self.active.get((index - self.active_base) as usize);
        }
        None
    }

    /// Check whether a handle still refers to the entry it was issued for.
    fn is_live(&self, id: BpId) -> bool {
        if id.generation > self.generation || id.generation < self.epoch_generation {
            return false;
        }
        if id.generation == self.generation {
            return (id.index as usize) < self.retired.len()
                || (id.index >= self.active_base && id.index < self.next_index());
        }
        // Handle from an older generation of this utterance: still good if
        // its index was a retired index by the end of that generation
        // (retired entries never move, and a candidate compacted onto its
        // own index did not move either), or if it sits in the active window
        // (entries at or past the frontier keep their indices across every
        // pass).
        (id.index as usize) < self.retired_history[id.generation as usize] as usize
            || (id.index >= self.active_base && id.index < self.next_index())
    }

    fn resolve(&self, id: BpId) -> Result<&BpEnt> {
        if !self.is_live(id) {
            return Err(LatticeError::StaleBp { id });
        }
        self.entry(id.index).ok_or(LatticeError::StaleBp { id })
    }

    fn prev_entry(&self, ent: &BpEnt) -> Option<&BpEnt> {
        if ent.prev == NO_PREV {
            None
        } else {
            self.entry(ent.prev as u32)
        }
    }

    /// Frame at which the word recorded by `ent` started.
    fn start_frame(&self, ent: &BpEnt) -> Frame {
        match self.prev_entry(ent) {
            Some(prev) => prev.frame.next(),
            None => Frame(0),
        }
    }

    /// Build the public copy-out view of an entry.
    fn view(&self, index: u32, ent: &BpEnt) -> Backpointer {
        Backpointer {
            id: BpId::new(index, self.generation),
            word: ent.word,
            score: ent.score,
            frame: ent.frame,
            prev: if ent.prev == NO_PREV {
                None
            } else {
                Some(BpId::new(ent.prev as u32, self.generation))
            },
            lm_state: ent.lm_state,
        }
    }

    /// Best-scoring entry of the most recent frame matching `word`
    /// (`None` matches any word). First maximum in insertion order wins.
    fn best_exit(&self, word: Option<WordId>) -> Option<(u32, &BpEnt)> {
        let last = self.frame_idx();
        if last.is_none() {
            return None;
        }
        let first = self.frame_start[last.value() as usize];
        let mut best: Option<(u32, &BpEnt)> = None;
        for index in first..self.next_index() {
            let Some(ent) = self.entry(index) else {
                continue;
            };
            if let Some(word) = word {
                if ent.word != word {
                    continue;
                }
            }
            match best {
                Some((_, incumbent)) if ent.score <= incumbent.score => {}
                _ => best = Some((index, ent)),
            }
        }
        best
    }

    /// Run the reachability collection pass for a new frontier.
    ///
    /// Returns the number of entries retired and dropped.
    fn collect(&mut self, frontier: Frame) -> (usize, usize) {
        self.active_frame = frontier;
        let boundary = self.frame_start[frontier.value() as usize];
        if boundary <= self.active_base {
            return (0, 0);
        }
        let base = self.active_base;
        let n_candidates = (boundary - base) as usize;

        // Mark: chase predecessor chains from every entry at or past the
        // boundary; whatever the chains never touch is garbage.
        let mut retained = vec![false; n_candidates];
        for ent in &self.active[n_candidates..] {
            let mut prev = ent.prev;
            while prev >= base as i32 && (prev as u32) < boundary {
                let slot = (prev as u32 - base) as usize;
                if retained[slot] {
                    break;
                }
                retained[slot] = true;
                prev = self.active[slot].prev;
            }
        }

        // Compact survivors into the retired prefix in index order,
        // recording where each one went.
        let first_new = self.retired.len() as u32;
        let mut remap = vec![NO_PREV; n_candidates];
        for (slot, keep) in retained.iter().enumerate() {
            if *keep {
                remap[slot] = self.retired.len() as i32;
                self.retired.push(self.active[slot]);
            }
        }
        let n_retired = self.retired.len() - first_new as usize;
        let n_dropped = n_candidates - n_retired;

        // Rewrite every link that pointed into the candidate window: the
        // rows just retired, then the surviving active rows.
        for ent in &mut self.retired[first_new as usize..] {
            if ent.prev >= base as i32 && (ent.prev as u32) < boundary {
                ent.prev = remap[(ent.prev as u32 - base) as usize];
            }
        }
        self.active.drain(..n_candidates);
        for ent in &mut self.active {
            if ent.prev >= base as i32 && (ent.prev as u32) < boundary {
                ent.prev = remap[(ent.prev as u32 - base) as usize];
            }
        }
        self.active_base = boundary;

        // A pass that moved or dropped anything invalidates outstanding
        // handles to the affected indices via a generation bump. Leading
        // candidates compacted onto their own indices never moved, so the
        // recorded boundary keeps their old handles resolvable.
        if n_dropped > 0 || first_new != base {
            let mut settled = first_new;
            if first_new == base {
                settled += retained.iter().take_while(|keep| **keep).count() as u32;
            }
            self.retired_history.push(settled);
            self.generation += 1;
        }
        (n_retired, n_dropped)
    }
}

/// Snapshot of a table's regions and framing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Frames pushed so far.
    pub n_frames: usize,
    /// Current garbage-collection frontier.
    pub active_frame: Frame,
    /// Entries in the retired prefix.
    pub retired: usize,
    /// Entries in the active window.
    pub active: usize,
    /// Global index of the first active entry.
    pub active_base: u32,
    /// One past the last assigned global index.
    pub next_index: u32,
    /// Current handle generation.
    pub generation: u32,
    /// Whether the table has been finalized.
    pub finalized: bool,
}

/// Incremental backpointer table shared between one producing search thread
/// and any number of consuming threads.
///
/// All mutation happens under a single internal lock, held for entire
/// collection passes, so no reader ever observes a partially renumbered
/// table. Share it as `Arc<BpTable>`; by convention only the producer calls
/// [`push_frame`](Self::push_frame), [`enter`](Self::enter),
/// [`update`](Self::update), [`finalize`](Self::finalize), and
/// [`reset`](Self::reset).
pub struct BpTable {
    utt_id: Uuid,
    state: Mutex<TableState>,
    frames: Condvar,
}

impl BpTable {
    /// Create an empty table using the given allocation hints.
    pub fn new(config: &LatticeConfig) -> Self {
        let utt_id = Uuid::new_v4();
        debug!("backpointer table {} created", utt_id);
        Self {
            utt_id,
            state: Mutex::new(TableState {
                retired: Vec::with_capacity(config.n_ent_alloc),
                active: Vec::with_capacity(config.n_ent_alloc),
                active_base: 0,
                frame_start: Vec::with_capacity(config.n_frame_alloc),
                active_frame: Frame(0),
                generation: 0,
                epoch_generation: 0,
                retired_history: Vec::new(),
                finalized: false,
            }),
            frames: Condvar::new(),
        }
    }

    /// Create a shared table, ready for one producer and many consumers.
    pub fn shared(config: &LatticeConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Identifier of this table in log output.
    pub fn utt_id(&self) -> Uuid {
        self.utt_id
    }

    /// Open the next frame and run the collection pass.
    ///
    /// Called by the producing search thread once per input frame, before the
    /// frame's entries are entered. `frontier` is the earliest frame the
    /// search can still extend; everything behind it that no surviving chain
    /// references is discarded, and what remains is compacted into the
    /// retired prefix.
    ///
    /// # Returns
    /// The newly opened frame number.
    pub fn push_frame(&self, frontier: Frame) -> Result<Frame> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(LatticeError::Finalized(format!(
                "push_frame on table {}",
                self.utt_id
            )));
        }
        let opened = state.frame_idx().next();
        if frontier.value() < 0 || frontier > opened || frontier < state.active_frame {
            return Err(LatticeError::InvalidFrontier {
                frontier,
                active: state.active_frame,
                current: opened,
            });
        }
        let start = state.next_index();
        state.frame_start.push(start);
        let (n_retired, n_dropped) = state.collect(frontier);
        let n_active = state.active.len();
        drop(state);

        self.frames.notify_all();
        record_frame();
        record_gc(n_retired, n_dropped, n_active);
        debug!(
            "table {} opened {} with frontier {}: retired {}, dropped {}, {} active",
            self.utt_id, opened, frontier, n_retired, n_dropped, n_active
        );
        Ok(opened)
    }

    /// Record one hypothesis endpoint on the open frame.
    ///
    /// Called by the producing search thread. `prev` links the new entry to
    /// the endpoint it extends and must end on an earlier frame; entries of
    /// the open frame keep their insertion order.
    ///
    /// # Returns
    /// A generation-tagged handle to the new entry.
    pub fn enter(
        &self,
        word: WordId,
        prev: Option<BpId>,
        end_frame: Frame,
        score: Score,
        lm_state: LmState,
    ) -> Result<BpId> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(LatticeError::Finalized(format!(
                "enter of {} on table {}",
                word, self.utt_id
            )));
        }
        let open = state.frame_idx();
        if open.is_none() {
            return Err(LatticeError::NoFrame(format!(
                "enter of {} before the first frame",
                word
            )));
        }
        if end_frame != open {
            return Err(LatticeError::FrameMismatch {
                expected: open,
                got: end_frame,
            });
        }
        let prev_raw = match prev {
            None => NO_PREV,
            Some(id) => {
                // Chains point strictly backward in time.
                let prev_frame = state.resolve(id)?.frame;
                if prev_frame >= end_frame {
                    return Err(LatticeError::FrameMismatch {
                        expected: end_frame,
                        got: prev_frame,
                    });
                }
                id.index as i32
            }
        };
        let index = state.next_index();
        state.active.push(BpEnt {
            word,
            score,
            frame: end_frame,
            prev: prev_raw,
            lm_state,
        });
        let id = BpId::new(index, state.generation);
        drop(state);

        record_enter();
        Ok(id)
    }

    /// Merge a better path into an entry of the open frame.
    ///
    /// Called by the producing search thread when two paths recombine on the
    /// same endpoint. The merge is monotone: only a strictly better score
    /// replaces the stored score, predecessor, and language-model context.
    /// A replacement predecessor must end on an earlier frame, like the link
    /// it replaces.
    ///
    /// # Returns
    /// `true` if the entry was improved, `false` if the stored path won.
    pub fn update(
        &self,
        id: BpId,
        score: Score,
        prev: Option<BpId>,
        lm_state: LmState,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(LatticeError::Finalized(format!(
                "update on table {}",
                self.utt_id
            )));
        }
        let entry_frame = state.resolve(id)?.frame;
        let open = state.frame_idx();
        if entry_frame != open {
            return Err(LatticeError::FrameMismatch {
                expected: open,
                got: entry_frame,
            });
        }
        let prev_raw = match prev {
            None => NO_PREV,
            Some(prev_id) => {
                // Same-frame links would let two entries point at each
                // other, and a chain walk would never terminate.
                let prev_frame = state.resolve(prev_id)?.frame;
                if prev_frame >= entry_frame {
                    return Err(LatticeError::FrameMismatch {
                        expected: entry_frame,
                        got: prev_frame,
                    });
                }
                prev_id.index as i32
            }
        };
        // Open-frame entries are always in the active window.
        let offset = (id.index - state.active_base) as usize;
        let ent = &mut state.active[offset];
        if score > ent.score {
            ent.score = score;
            ent.prev = prev_raw;
            ent.lm_state = lm_state;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Close the table: no more frames or entries, all waiters unblocked.
    ///
    /// The active window is frozen in place without a further collection
    /// pass (nothing can ever reference past the end), so every handle that
    /// was valid before the call stays valid.
    pub fn finalize(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(LatticeError::AlreadyFinalized(format!(
                "table {}",
                self.utt_id
            )));
        }
        state.finalized = true;
        state.active_frame = state.frame_idx();
        let n_retired = state.retired.len();
        let n_active = state.active.len();
        drop(state);

        self.frames.notify_all();
        record_finalize();
        info!(
            "table {} finalized with {} retired and {} active entries",
            self.utt_id, n_retired, n_active
        );
        Ok(())
    }

    /// Clear the table for a new utterance, keeping allocations.
    ///
    /// Called by the producing search thread between utterances. Every
    /// outstanding handle goes stale and all waiters are woken.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.retired.clear();
        state.active.clear();
        state.frame_start.clear();
        state.active_base = 0;
        state.active_frame = Frame(0);
        state.finalized = false;
        state.retired_history.push(0);
        state.generation += 1;
        state.epoch_generation = state.generation;
        drop(state);

        self.frames.notify_all();
        debug!("table {} reset for a new utterance", self.utt_id);
    }

    /// Copy out the entry a handle refers to.
    ///
    /// A handle invalidated by collection, renumbering, or reset fails with
    /// [`LatticeError::StaleBp`] instead of resolving to shifted data.
    pub fn ent(&self, id: BpId) -> Result<Backpointer> {
        let state = self.state.lock();
        let ent = state.resolve(id)?;
        Ok(state.view(id.index, ent))
    }

    /// Frame at which the word recorded by this entry started: one past its
    /// predecessor's end frame, or frame 0 for a chain root.
    pub fn sf(&self, id: BpId) -> Result<Frame> {
        let state = self.state.lock();
        let ent = state.resolve(id)?;
        Ok(state.start_frame(ent))
    }

    /// Build a current-generation handle for a raw global index.
    ///
    /// Useful for re-resolving after a collection pass; validity is still
    /// checked when the handle is used.
    pub fn handle(&self, index: u32) -> BpId {
        BpId::new(index, self.state.lock().generation)
    }

    /// Best-scoring exit on the most recent frame.
    ///
    /// # Arguments
    /// * `word` - Restrict the scan to this word; `None` accepts any word.
    ///
    /// # Returns
    /// The first maximum in insertion order, or `None` when no entry of the
    /// most recent frame matches.
    pub fn find_exit(&self, word: Option<WordId>) -> Option<Backpointer> {
        let state = self.state.lock();
        state
            .best_exit(word)
            .map(|(index, ent)| state.view(index, ent))
    }

    /// Word sequence of the path ending at `exit`, in time order.
    ///
    /// With `exit` of `None` the best exit of the most recent frame is used.
    /// An empty table, or one whose last frame has no entries, yields an
    /// empty hypothesis.
    pub fn hyp(&self, exit: Option<BpId>) -> Result<Hypothesis> {
        let state = self.state.lock();
        let exit_entry = match exit {
            Some(id) => Some(*state.resolve(id)?),
            None => state.best_exit(None).map(|(_, ent)| *ent),
        };
        let Some(entry) = exit_entry else {
            return Ok(Hypothesis::default());
        };

        let mut words = vec![entry.word];
        let mut prev = entry.prev;
        while prev != NO_PREV {
            let Some(ent) = state.entry(prev as u32) else {
                break;
            };
            words.push(ent.word);
            prev = ent.prev;
        }
        words.reverse();
        Ok(Hypothesis {
            words,
            score: entry.score,
        })
    }

    /// Per-word segments of the path ending at `exit`, first word to last.
    ///
    /// Each segment carries the word's frame span and the score delta its
    /// entry contributed. Language-model fields are zero and `lm_state` is
    /// passed through untouched; rescoring belongs to the language model.
    /// The iterator is a single pass over a snapshot; call again to re-walk.
    pub fn seg_iter(&self, exit: Option<BpId>) -> Result<SegIter> {
        let state = self.state.lock();
        let exit_entry = match exit {
            Some(id) => Some(*state.resolve(id)?),
            None => state.best_exit(None).map(|(_, ent)| *ent),
        };
        let Some(entry) = exit_entry else {
            return Ok(SegIter::new(Vec::new()));
        };

        let mut chain = vec![entry];
        let mut prev = entry.prev;
        while prev != NO_PREV {
            let Some(ent) = state.entry(prev as u32) else {
                break;
            };
            chain.push(*ent);
            prev = ent.prev;
        }

        let mut segments = Vec::with_capacity(chain.len());
        let mut prev_score = Score::ZERO;
        for ent in chain.iter().rev() {
            segments.push(Segment {
                word: ent.word,
                start_frame: state.start_frame(ent),
                end_frame: ent.frame,
                ascr: ent.score.delta(prev_score),
                lscr: Score::ZERO,
                lm_backoff: Score::ZERO,
                lm_state: ent.lm_state,
            });
            prev_score = ent.score;
        }
        Ok(SegIter::new(segments))
    }

    /// Block until a new frame is opened, the table is finalized, or the
    /// timeout elapses.
    ///
    /// # Returns
    /// `Ready` with the current frame index after any change to the frame
    /// counter (a reset counts as a change), `Ended` once finalized, or
    /// `TimedOut`.
    pub fn wait(&self, timeout: Option<Duration>) -> Wait<Frame> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        let entered_at = state.frame_start.len();
        loop {
            if state.frame_start.len() != entered_at {
                return Wait::Ready(state.frame_idx());
            }
            if state.finalized {
                return Wait::Ended;
            }
            match deadline {
                None => self.frames.wait(&mut state),
                Some(deadline) => {
                    if self.frames.wait_until(&mut state, deadline).timed_out() {
                        if state.frame_start.len() != entered_at {
                            return Wait::Ready(state.frame_idx());
                        }
                        if state.finalized {
                            return Wait::Ended;
                        }
                        return Wait::TimedOut;
                    }
                }
            }
        }
    }

    /// Index of the most recently opened frame, [`Frame::NONE`] when empty.
    pub fn frame_idx(&self) -> Frame {
        self.state.lock().frame_idx()
    }

    /// The current garbage-collection frontier. Equals
    /// [`frame_idx`](Self::frame_idx) once the table is finalized.
    pub fn active_frame(&self) -> Frame {
        self.state.lock().active_frame
    }

    /// Earliest start frame among active entries, or the frontier when the
    /// active window is empty. Consumers use it to bound how far back a
    /// still-growing chain can reach.
    pub fn active_sf(&self) -> Frame {
        let state = self.state.lock();
        state
            .active
            .iter()
            .map(|ent| state.start_frame(ent))
            .min()
            .unwrap_or(state.active_frame)
    }

    /// Whether [`finalize`](Self::finalize) has been called.
    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }

    /// Snapshot the table's regions and framing state.
    pub fn stats(&self) -> TableStats {
        let state = self.state.lock();
        TableStats {
            n_frames: state.frame_start.len(),
            active_frame: state.active_frame,
            retired: state.retired.len(),
            active: state.active.len(),
            active_base: state.active_base,
            next_index: state.next_index(),
            generation: state.generation,
            finalized: state.finalized,
        }
    }

    /// Render the table for logs and tests. No stability contract.
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;

        let state = self.state.lock();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "backpointer table {} generation {}{}",
            self.utt_id,
            state.generation,
            if state.finalized { " (finalized)" } else { "" }
        );
        let _ = writeln!(
            out,
            "frames {} frontier {} frame_start {:?}",
            state.frame_start.len(),
            state.active_frame,
            state.frame_start
        );
        let _ = writeln!(
            out,
            "retired {} active {} gap [{}, {})",
            state.retired.len(),
            state.active.len(),
            state.retired.len(),
            state.active_base
        );
        for (index, ent) in state.retired.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {:>6}: {} {} score {} prev {}",
                index, ent.word, ent.frame, ent.score, ent.prev
            );
        }
        for (offset, ent) in state.active.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {:>6}: {} {} score {} prev {} (active)",
                state.active_base as usize + offset,
                ent.word,
                ent.frame,
                ent.score,
                ent.prev
            );
        }
        out
    }
}

impl Default for BpTable {
    fn default() -> Self {
        Self::new(config::global())
    }
}
