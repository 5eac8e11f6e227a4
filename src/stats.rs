//! 피드별 카운터.

use crate::dispatcher::DispatchReport;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct FeedStats {
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    frames_dispatched: AtomicU64,
    heartbeats: AtomicU64,
    frames_dropped: AtomicU64,
    handler_failures: AtomicU64,
    reconnects_scheduled: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStatsSnapshot {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub frames_dispatched: u64,
    pub heartbeats: u64,
    pub frames_dropped: u64,
    pub handler_failures: u64,
    pub reconnects_scheduled: u64,
}

impl FeedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self, len: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, report: DispatchReport) {
        self.frames_dispatched.fetch_add(1, Ordering::Relaxed);
        self.handler_failures.fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
        }
    }
}

impl FeedStatsSnapshot {
    pub fn average_frame_size(&self) -> f64 {
        if self.frames_received == 0 {
            0.0
        } else {
            self.bytes_received as f64 / self.frames_received as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = FeedStats::new();
        stats.record_frame(100);
        stats.record_frame(50);
        stats.record_heartbeat();
        stats.record_drop();
        stats.record_dispatch(DispatchReport { delivered: 1, failed: 2 });
        stats.record_reconnect();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.bytes_received, 150);
        assert_eq!(snap.heartbeats, 1);
        assert_eq!(snap.frames_dropped, 1);
        assert_eq!(snap.frames_dispatched, 1);
        assert_eq!(snap.handler_failures, 2);
        assert_eq!(snap.reconnects_scheduled, 1);
        assert_eq!(snap.average_frame_size(), 75.0);
    }

    #[test]
    fn test_average_without_frames() {
        assert_eq!(FeedStatsSnapshot::default().average_frame_size(), 0.0);
    }
}
