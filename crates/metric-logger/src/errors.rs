// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;
use std::time::Duration;

/// Errors surfaced by the logger lifecycle (construction and shutdown).
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("A tokio runtime is required to start the processing loop")]
    NoRuntime,

    #[error("Shutdown did not drain within {0:?}, processing loop was cancelled")]
    ShutdownTimeout(Duration),
}

/// Reason a single `log` call was not enqueued.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum LogError {
    #[error("Queue is full, point dropped")]
    QueueFull,

    #[error("Point is not a finite number: step={step}, value={value}")]
    NonFinite { step: f64, value: f64 },

    #[error("Logger is stopping, point refused")]
    Stopped,
}

/// Failure of one delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The batch could not be turned into a request body. Never retried.
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    /// Transport error (no status) or an HTTP status >= 400.
    #[error("Failed to deliver batch: {1}")]
    Destination(Option<StatusCode>, String),
}

impl DeliveryError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Destination(..))
    }
}
