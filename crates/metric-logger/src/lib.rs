// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Non-blocking client for shipping scalar metric curves to an HTTP collector.
//!
//! Producers call [`MetricLogger::log`] from any thread. Points go through a bounded
//! queue that drops on overflow, are batched by a background task whose batch size and
//! flush interval adapt to queue pressure, and are POSTed per metric name as
//! `{"name", "xCoordinates", "yCoordinates"}` JSON with retries.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod buffer;
pub mod config;
pub mod constants;
pub mod errors;
pub mod flush_interval;
pub mod flusher;
pub mod logger;
pub mod metric;
pub mod processing_loop;
pub mod queue;
pub mod rolling_stats;
pub mod stats;

pub use config::{Backoff, Compression, FlushIntervals, LoggerConfig};
pub use errors::{DeliveryError, LogError, LoggerError};
pub use flush_interval::Mode;
pub use logger::MetricLogger;
pub use stats::{LoopState, StatsSnapshot};
