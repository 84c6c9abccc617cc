// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-window mean/min/max over a circular buffer.
//!
//! `min` and `max` record every extreme seen since creation. A value that leaves the
//! window is never un-recorded, so both can be stale relative to the current window.
//! Only `mean` is exact for the window.

#[derive(Debug, Clone)]
pub struct RollingStats {
    buffer: Box<[f64]>,
    index: usize,
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl RollingStats {
    /// Creates an empty window. A zero window size is bumped to one.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        RollingStats {
            buffer: vec![0.0; window_size.max(1)].into_boxed_slice(),
            index: 0,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, value: f64) {
        if self.count < self.buffer.len() {
            self.sum += value;
            self.count += 1;
        } else {
            self.sum = self.sum - self.buffer[self.index] + value;
        }
        self.buffer[self.index] = value;
        self.index = (self.index + 1) % self.buffer.len();

        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    #[must_use]
    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    #[must_use]
    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Number of samples currently in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn window_size(&self) -> usize {
        self.buffer.len()
    }
}
