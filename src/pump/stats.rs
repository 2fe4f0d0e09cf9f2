//! Pump counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::pipeline::ProcessReport;

/// Snapshot of a pump's activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Processing cycles that moved frames.
    pub cycles: u64,
    /// Frames moved through the port.
    pub frames: u64,
    /// Cycles where the port moved less than a full block.
    pub short_transfers: u64,
    /// Streams skipped across all cycles.
    pub skipped_streams: u64,
    /// Started streams holding the port open.
    pub users: usize,
    /// Whether the pump thread is running.
    pub running: bool,
}

/// Counters updated by the pump thread.
#[derive(Default)]
pub(crate) struct PumpCounters {
    cycles: AtomicU64,
    frames: AtomicU64,
    short_transfers: AtomicU64,
    skipped_streams: AtomicU64,
}

impl PumpCounters {
    pub fn record(&self, frames: usize, report: ProcessReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
        self.skipped_streams
            .fetch_add(report.skipped as u64, Ordering::Relaxed);
    }

    pub fn record_short(&self) {
        self.short_transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, users: usize, running: bool) -> PumpStats {
        PumpStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            short_transfers: self.short_transfers.load(Ordering::Relaxed),
            skipped_streams: self.skipped_streams.load(Ordering::Relaxed),
            users,
            running,
        }
    }
}
