// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::LogError;
use crate::metric::MetricPoint;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

/// Consumer half of the ingest queue.
///
/// Shared so the logger can still reach residual points after the processing loop was
/// cancelled.
pub type IngestReceiver = Arc<Mutex<mpsc::Receiver<MetricPoint>>>;

/// Producer half of the bounded ingest queue. Enqueuing never blocks.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<MetricPoint>,
}

impl IngestQueue {
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, IngestReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (IngestQueue { tx }, Arc::new(Mutex::new(rx)))
    }

    pub fn push(&self, point: MetricPoint) -> Result<(), LogError> {
        self.tx.try_send(point).map_err(|e| match e {
            TrySendError::Full(_) => LogError::QueueFull,
            TrySendError::Closed(_) => LogError::Stopped,
        })
    }

    /// Points waiting to be consumed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Occupancy in `[0, 1]`.
    #[must_use]
    pub fn pressure(&self) -> f64 {
        self.len() as f64 / self.max_capacity() as f64
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
