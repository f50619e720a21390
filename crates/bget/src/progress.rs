//! Progress-display collaborator seam.
//!
//! The engine reports progress through these traits and never renders
//! anything itself; the CLI supplies an indicatif-backed sink, tests and
//! quiet mode use [`NullSink`]. One tracker is created per download/remux
//! task and must be finished on every exit path of that task.

/// A single task's progress handle.
pub trait ProgressTracker: Send + Sync {
    fn advance(&self, n: u64);
    /// Tear the tracker down. Trackers left unfinished leak display rows.
    fn finish(&self);
}

/// The shared progress surface owned by the orchestrator.
pub trait ProgressSink: Send + Sync {
    /// Create a tracker. `total` is the expected unit count when known;
    /// without it the display degrades to a plain counter.
    fn tracker(&self, total: Option<u64>, label: &str) -> Box<dyn ProgressTracker>;

    /// Stop the whole surface. Called once at the end of a run, on every
    /// outcome.
    fn clear(&self);
}

/// Sink that renders nothing.
pub struct NullSink;

struct NullTracker;

impl ProgressTracker for NullTracker {
    fn advance(&self, _n: u64) {}
    fn finish(&self) {}
}

impl ProgressSink for NullSink {
    fn tracker(&self, _total: Option<u64>, _label: &str) -> Box<dyn ProgressTracker> {
        Box::new(NullTracker)
    }

    fn clear(&self) {}
}
