// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::LogError;
use serde::Serialize;
use std::time::Instant;
use ustr::Ustr;

/// One `(step, value)` observation of a named metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricPoint {
    pub name: Ustr,
    pub step: f64,
    pub value: f64,
    pub enqueued_at: Instant,
}

impl MetricPoint {
    /// Builds a point stamped with the current time. Non-finite numbers are rejected since
    /// the wire format cannot carry them.
    pub fn new(name: Ustr, step: f64, value: f64) -> Result<Self, LogError> {
        if !step.is_finite() || !value.is_finite() {
            return Err(LogError::NonFinite { step, value });
        }
        Ok(MetricPoint {
            name,
            step,
            value,
            enqueued_at: Instant::now(),
        })
    }
}

/// Points of a single metric name, in enqueue order, as shipped on the wire.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Batch {
    pub name: Ustr,
    #[serde(rename = "xCoordinates")]
    pub x_coordinates: Vec<f64>,
    #[serde(rename = "yCoordinates")]
    pub y_coordinates: Vec<f64>,
}

impl Batch {
    #[must_use]
    pub fn new(name: Ustr) -> Self {
        Batch {
            name,
            x_coordinates: Vec::new(),
            y_coordinates: Vec::new(),
        }
    }

    pub fn push(&mut self, step: f64, value: f64) {
        self.x_coordinates.push(step);
        self.y_coordinates.push(value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.x_coordinates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x_coordinates.is_empty()
    }
}
