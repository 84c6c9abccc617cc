// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::flush_interval::Mode;
use crate::rolling_stats::RollingStats;
use derive_more::Display;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Lifecycle of the processing loop.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    #[display("running")]
    Running,
    #[display("stopping")]
    Stopping,
    #[display("stopped")]
    Stopped,
}

impl LoopState {
    #[must_use]
    pub fn mode(self) -> Mode {
        match self {
            LoopState::Running => Mode::Normal,
            LoopState::Stopping | LoopState::Stopped => Mode::Draining,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Running,
            1 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LoopState::Running => 0,
            LoopState::Stopping => 1,
            LoopState::Stopped => 2,
        }
    }
}

#[derive(Debug)]
struct Windows {
    batch_times: RollingStats,
    queue_pressure: RollingStats,
    batch_sizes: RollingStats,
    point_latency: RollingStats,
}

/// Statistics shared between producers, the processing loop and `get_stats`.
///
/// Counters are atomics since producers bump `dropped` concurrently with the loop. The
/// rolling windows are only written by the loop.
#[derive(Debug)]
pub struct RunningStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    failed_batches: AtomicU64,
    failed_points: AtomicU64,
    retried_batches: AtomicU64,
    in_flight_batches: AtomicU64,
    in_flight_points: AtomicU64,
    current_batch_size: AtomicUsize,
    state: AtomicU8,
    windows: Mutex<Windows>,
}

impl RunningStats {
    #[must_use]
    pub fn new(window: usize, initial_batch_size: usize) -> Self {
        RunningStats {
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed_batches: AtomicU64::new(0),
            failed_points: AtomicU64::new(0),
            retried_batches: AtomicU64::new(0),
            in_flight_batches: AtomicU64::new(0),
            in_flight_points: AtomicU64::new(0),
            current_batch_size: AtomicUsize::new(initial_batch_size),
            state: AtomicU8::new(LoopState::Running.as_u8()),
            windows: Mutex::new(Windows {
                batch_times: RollingStats::new(window),
                queue_pressure: RollingStats::new(window),
                batch_sizes: RollingStats::new(window),
                point_latency: RollingStats::new(window),
            }),
        }
    }

    /// Points moved from the queue into the loop's buffer. They stay in flight until a
    /// delivery settles them.
    pub fn record_buffered(&self, points: usize) {
        self.in_flight_points
            .fetch_add(points as u64, Ordering::Relaxed);
    }

    /// Batches handed to delivery by a flush, settled one by one by `record_processed` or
    /// `record_failed_batch`.
    pub fn begin_flush(&self, batches: usize) {
        self.in_flight_batches
            .fetch_add(batches as u64, Ordering::Relaxed);
    }

    /// Count every unsettled point and batch as failed. Used once the loop was aborted,
    /// either mid flush or while it was still filling its buffer.
    pub fn abandon_in_flight(&self) -> u64 {
        let batches = self.in_flight_batches.swap(0, Ordering::Relaxed);
        let points = self.in_flight_points.swap(0, Ordering::Relaxed);
        self.failed_batches.fetch_add(batches, Ordering::Relaxed);
        self.failed_points.fetch_add(points, Ordering::Relaxed);
        points
    }

    fn settle(&self, points: usize) {
        saturating_sub(&self.in_flight_batches, 1);
        saturating_sub(&self.in_flight_points, points as u64);
    }

    pub fn record_processed(&self, points: usize) {
        self.processed.fetch_add(points as u64, Ordering::Relaxed);
        self.settle(points);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_batch(&self, points: usize) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.failed_points.fetch_add(points as u64, Ordering::Relaxed);
        self.settle(points);
    }

    pub fn set_current_batch_size(&self, size: usize) {
        self.current_batch_size.store(size, Ordering::Relaxed);
    }

    pub fn set_state(&self, state: LoopState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Records one flush cycle.
    pub fn record_cycle(&self, queue_pressure: f64, flush: Option<FlushSample>) {
        #[allow(clippy::expect_used)]
        let mut windows = self.windows.lock().expect("lock poisoned");
        windows.queue_pressure.add(queue_pressure);
        if let Some(sample) = flush {
            windows.batch_times.add(sample.elapsed.as_secs_f64());
            windows.batch_sizes.add(sample.points as f64);
            windows
                .point_latency
                .add(sample.mean_point_latency.as_secs_f64());
        }
    }

    #[must_use]
    pub fn snapshot(&self, queue_size: usize) -> StatsSnapshot {
        #[allow(clippy::expect_used)]
        let windows = self.windows.lock().expect("lock poisoned");
        let state = self.state();
        StatsSnapshot {
            processed_count: self.processed.load(Ordering::Relaxed),
            dropped_count: self.dropped.load(Ordering::Relaxed),
            rejected_count: self.rejected.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            failed_points: self.failed_points.load(Ordering::Relaxed),
            retried_batches: self.retried_batches.load(Ordering::Relaxed),
            queue_size,
            avg_batch_time: windows.batch_times.mean(),
            min_batch_time: windows.batch_times.min(),
            max_batch_time: windows.batch_times.max(),
            avg_queue_pressure: windows.queue_pressure.mean(),
            avg_batch_size: windows.batch_sizes.mean(),
            avg_point_latency: windows.point_latency.mean(),
            current_batch_size: self.current_batch_size.load(Ordering::Relaxed),
            mode: state.mode(),
            state,
        }
    }
}

fn saturating_sub(counter: &AtomicU64, value: u64) {
    // The closure always returns Some, the update cannot fail.
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}

/// Measurements of one non-empty flush.
#[derive(Clone, Copy, Debug)]
pub struct FlushSample {
    pub points: usize,
    pub elapsed: Duration,
    pub mean_point_latency: Duration,
}

/// Point-in-time view returned by `get_stats`. Times are in seconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub processed_count: u64,
    pub dropped_count: u64,
    pub rejected_count: u64,
    pub failed_batches: u64,
    pub failed_points: u64,
    pub retried_batches: u64,
    pub queue_size: usize,
    pub avg_batch_time: f64,
    pub min_batch_time: f64,
    pub max_batch_time: f64,
    pub avg_queue_pressure: f64,
    pub avg_batch_size: f64,
    pub avg_point_latency: f64,
    pub current_batch_size: usize,
    pub mode: Mode,
    pub state: LoopState,
}
