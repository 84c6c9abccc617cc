// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::FlushIntervals;
use crate::constants::{FLUSH_INTERVAL_WINDOW, HIGH_PRESSURE, IDLE_INTERVAL_FACTOR, LOW_PRESSURE};
use crate::rolling_stats::RollingStats;
use derive_more::Display;
use serde::Serialize;
use std::time::Duration;

/// Operating mode of the processing loop. `Normal` → `Draining` is one-way.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[display("normal")]
    Normal,
    #[display("draining")]
    Draining,
}

/// Maximum wait before a flush is forced.
#[derive(Debug, Clone)]
pub struct AdaptiveFlushInterval {
    intervals: FlushIntervals,
    load: RollingStats,
}

impl AdaptiveFlushInterval {
    #[must_use]
    pub fn new(intervals: FlushIntervals) -> Self {
        AdaptiveFlushInterval {
            intervals,
            load: RollingStats::new(FLUSH_INTERVAL_WINDOW),
        }
    }

    /// `queue_pressure` is the queue occupancy in `[0, 1]`. Draining ignores load and does
    /// not record it.
    pub fn interval(&mut self, mode: Mode, queue_pressure: f64) -> Duration {
        if mode == Mode::Draining {
            return self.intervals.drain;
        }

        self.load.add(queue_pressure.clamp(0.0, 1.0));
        let load = self.load.mean();

        if load > HIGH_PRESSURE {
            self.intervals.min
        } else if load < LOW_PRESSURE {
            self.intervals
                .normal
                .mul_f64(IDLE_INTERVAL_FACTOR)
                .min(self.intervals.max)
        } else {
            let factor = (load - LOW_PRESSURE) / (HIGH_PRESSURE - LOW_PRESSURE);
            let normal = self.intervals.normal.as_secs_f64();
            let min = self.intervals.min.as_secs_f64();
            Duration::from_secs_f64(normal + (min - normal) * factor)
        }
    }
}
