//! Send/receive performance accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// A point-in-time snapshot of transmission and reception counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
    /// Running send-time average in milliseconds, updated as
    /// `(avg + sample) / 2`. Not a true moving average: it converges to
    /// recent samples.
    pub avg_send_time_ms: f64,
    /// Running receive-time average; same formula as the send side.
    pub avg_receive_time_ms: f64,
}

/// Thread-safe recorder behind the counters; cheap to clone and share.
#[derive(Clone, Default)]
pub struct StatsRecorder {
    packets_sent: Arc<AtomicU64>,
    packets_received: Arc<AtomicU64>,
    send_errors: Arc<AtomicU64>,
    receive_errors: Arc<AtomicU64>,
    avg_send_time_ms: Arc<Mutex<f64>>,
    avg_receive_time_ms: Arc<Mutex<f64>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one transmission attempt and its elapsed time.
    pub fn record_send(&self, elapsed_ms: f64, success: bool) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.send_errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut avg = self.avg_send_time_ms.lock();
        *avg = (*avg + elapsed_ms) / 2.0;
    }

    /// Record one reception attempt and its elapsed time.
    pub fn record_receive(&self, elapsed_ms: f64, success: bool) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.receive_errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut avg = self.avg_receive_time_ms.lock();
        *avg = (*avg + elapsed_ms) / 2.0;
    }

    pub fn snapshot(&self) -> PerformanceStats {
        PerformanceStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            avg_send_time_ms: *self.avg_send_time_ms.lock(),
            avg_receive_time_ms: *self.avg_receive_time_ms.lock(),
        }
    }

    pub fn reset(&self) {
        self.packets_sent.store(0, Ordering::Relaxed);
        self.packets_received.store(0, Ordering::Relaxed);
        self.send_errors.store(0, Ordering::Relaxed);
        self.receive_errors.store(0, Ordering::Relaxed);
        *self.avg_send_time_ms.lock() = 0.0;
        *self.avg_receive_time_ms.lock() = 0.0;
    }
}
