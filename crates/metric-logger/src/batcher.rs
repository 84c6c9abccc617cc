// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    BATCHER_WINDOW, BATCH_GROWTH_FACTOR, FAST_PROCESSING, HIGH_PRESSURE, IDLE_QUEUE_SHARE,
    LOW_PRESSURE,
};
use crate::rolling_stats::RollingStats;
use std::time::Duration;
use tracing::debug;

/// Batch size threshold that follows queue pressure and delivery latency.
///
/// The size grows only when the queue is under pressure *and* recent deliveries were
/// fast, and shrinks only when both the instant and the averaged queue depth are low.
/// Anything in between leaves the size untouched.
#[derive(Debug, Clone)]
pub struct AdaptiveBatcher {
    current_size: usize,
    min_size: usize,
    max_size: usize,
    growth_factor: f64,
    processing_times: RollingStats,
    queue_sizes: RollingStats,
}

impl AdaptiveBatcher {
    /// `initial_size` is clamped into `[min_size, max_size]`.
    #[must_use]
    pub fn new(initial_size: usize, min_size: usize, max_size: usize) -> Self {
        let min_size = min_size.max(1);
        let max_size = max_size.max(min_size);
        AdaptiveBatcher {
            current_size: initial_size.clamp(min_size, max_size),
            min_size,
            max_size,
            growth_factor: BATCH_GROWTH_FACTOR,
            processing_times: RollingStats::new(BATCHER_WINDOW),
            queue_sizes: RollingStats::new(BATCHER_WINDOW),
        }
    }

    #[must_use]
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Record one flush and resize. Growth multiplies by the growth factor but moves by at
    /// least one, so sizes below 5 grow faster than the bare factor would. Shrinking divides
    /// by the factor and is floored at `min_size`.
    pub fn adjust(&mut self, queue_size: usize, max_queue_size: usize, last_process_time: Duration) {
        self.processing_times.add(last_process_time.as_secs_f64());
        self.queue_sizes.add(queue_size as f64);

        let max_queue_size = max_queue_size.max(1) as f64;
        let pressure = queue_size as f64 / max_queue_size;
        let previous = self.current_size;

        if pressure > HIGH_PRESSURE && self.processing_times.mean() < FAST_PROCESSING.as_secs_f64()
        {
            // Always move by at least one so small sizes can still grow.
            let grown = (self.current_size as f64 * self.growth_factor) as usize;
            self.current_size = grown.max(self.current_size + 1).min(self.max_size);
        } else if pressure < LOW_PRESSURE
            && self.queue_sizes.mean() < max_queue_size * IDLE_QUEUE_SHARE
        {
            let shrunk = (self.current_size as f64 / self.growth_factor) as usize;
            self.current_size = shrunk.max(self.min_size);
        }

        if previous != self.current_size {
            debug!(
                "Batch size adjusted from {} to {} (queue pressure {:.2})",
                previous, self.current_size, pressure
            );
        }
    }
}
