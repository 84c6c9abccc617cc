// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1_000;
/// Largest capacity the ingest channel accepts.
pub const MAX_QUEUE_SIZE: usize = tokio::sync::Semaphore::MAX_PERMITS;
/// Ceiling of the sizes the loop preallocates for: batch sizes and stats windows.
pub const MAX_PREALLOCATED: usize = 1 << 20;
pub const DEFAULT_INITIAL_BATCH_SIZE: usize = 50;
pub const DEFAULT_MIN_BATCH_SIZE: usize = 25;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

pub const DEFAULT_MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_NORMAL_FLUSH_INTERVAL: Duration = Duration::from_secs(12);
pub const DEFAULT_MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_DRAIN_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Window of the statistics reported by `get_stats`.
pub const DEFAULT_STATS_WINDOW: usize = 100;
/// Window the batcher uses to smooth processing time and queue depth.
pub const BATCHER_WINDOW: usize = 100;
/// Window the flush interval uses to smooth queue pressure.
pub const FLUSH_INTERVAL_WINDOW: usize = 20;

pub const BATCH_GROWTH_FACTOR: f64 = 1.2;
pub const HIGH_PRESSURE: f64 = 0.8;
pub const LOW_PRESSURE: f64 = 0.2;
/// Batches only grow while deliveries stay under this average latency.
pub const FAST_PROCESSING: Duration = Duration::from_millis(10);
/// Batches only shrink while the average queue depth stays under this share of capacity.
pub const IDLE_QUEUE_SHARE: f64 = 0.3;
/// Multiplier applied to the normal interval when the queue is idle.
pub const IDLE_INTERVAL_FACTOR: f64 = 1.5;
/// Floor of a single wait on the queue.
pub const MIN_WAIT: Duration = Duration::from_millis(1);
