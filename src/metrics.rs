//! Lattice store metrics.
//!
//! Counters and gauges for monitoring table growth, garbage collection, and
//! synchronized-array trimming through the `metrics` facade. Installing an
//! exporter is the embedding application's concern.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register all metrics with their descriptions.
///
/// Optional; calling it once at startup gives exporters human-readable help
/// strings for every series this crate emits.
pub fn register_metrics() {
    describe_counter!(
        "lattice_entries_total",
        "Total number of backpointer entries entered"
    );
    describe_counter!(
        "lattice_entries_retired_total",
        "Total number of entries retired by garbage collection"
    );
    describe_counter!(
        "lattice_entries_dropped_total",
        "Total number of unreachable entries dropped by garbage collection"
    );
    describe_counter!("lattice_gc_passes_total", "Total garbage collection passes");
    describe_counter!("lattice_frames_total", "Total frames pushed");
    describe_counter!(
        "lattice_finalized_total",
        "Total number of tables finalized"
    );
    describe_gauge!(
        "lattice_active_entries",
        "Entries currently in the active window of the most recent table"
    );
    describe_counter!(
        "sync_array_trimmed_total",
        "Total elements trimmed from synchronized array windows"
    );
}

/// Record one entered backpointer.
pub fn record_enter() {
    counter!("lattice_entries_total").increment(1);
}

/// Record one pushed frame.
pub fn record_frame() {
    counter!("lattice_frames_total").increment(1);
}

/// Record the outcome of a garbage collection pass.
pub fn record_gc(retired: usize, dropped: usize, active: usize) {
    counter!("lattice_gc_passes_total").increment(1);
    counter!("lattice_entries_retired_total").increment(retired as u64);
    counter!("lattice_entries_dropped_total").increment(dropped as u64);
    gauge!("lattice_active_entries").set(active as f64);
}

pub fn record_finalize() {
    counter!("lattice_finalized_total").increment(1);
}

/// Record elements trimmed from a synchronized array window.
pub fn record_trim(trimmed: usize) {
    counter!("sync_array_trimmed_total").increment(trimmed as u64);
}
