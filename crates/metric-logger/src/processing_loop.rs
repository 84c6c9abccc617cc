// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::batcher::AdaptiveBatcher;
use crate::buffer::MetricBuffer;
use crate::config::LoggerConfig;
use crate::constants::MIN_WAIT;
use crate::flush_interval::{AdaptiveFlushInterval, Mode};
use crate::flusher::DeliveryClient;
use crate::metric::MetricPoint;
use crate::queue::{IngestQueue, IngestReceiver};
use crate::stats::{FlushSample, LoopState, RunningStats};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout_at;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum Wake {
    Cancelled,
    Received(usize),
    Deadline,
}

/// Background consumer of the ingest queue.
///
/// Each iteration waits until either the adaptive batch size is reached or the adaptive
/// flush interval elapsed, then delivers what it collected grouped per metric name. A
/// flush completes before the next one starts, which keeps every metric name in order.
///
/// Cancelling the token switches the loop to draining: the queue is closed to producers,
/// its remaining content is flushed and the loop exits.
pub struct ProcessingLoop {
    queue: IngestQueue,
    rx: IngestReceiver,
    client: DeliveryClient,
    stats: Arc<RunningStats>,
    batcher: AdaptiveBatcher,
    interval: AdaptiveFlushInterval,
    buffer: MetricBuffer,
    incoming: Vec<MetricPoint>,
    cancel: CancellationToken,
    mode: Mode,
}

impl ProcessingLoop {
    #[must_use]
    pub fn new(
        config: &LoggerConfig,
        queue: IngestQueue,
        rx: IngestReceiver,
        client: DeliveryClient,
        stats: Arc<RunningStats>,
        cancel: CancellationToken,
    ) -> Self {
        let batcher = AdaptiveBatcher::new(
            config.initial_batch_size,
            config.min_batch_size,
            config.max_batch_size,
        );
        stats.set_current_batch_size(batcher.current_size());
        ProcessingLoop {
            queue,
            rx,
            client,
            stats,
            batcher,
            interval: AdaptiveFlushInterval::new(config.flush_intervals),
            buffer: MetricBuffer::with_capacity(config.max_batch_size),
            incoming: Vec::with_capacity(config.max_batch_size),
            cancel,
            mode: Mode::Normal,
        }
    }

    pub async fn run(mut self) {
        let mut rx = Arc::clone(&self.rx).lock_owned().await;
        debug!("Processing loop started");

        loop {
            let pressure = self.queue.pressure();
            let wait = self.interval.interval(self.mode, pressure).max(MIN_WAIT);
            let deadline = tokio::time::Instant::now() + wait;

            let closed = self.collect(&mut rx, deadline).await;
            let sample = self.flush().await;
            self.stats.record_cycle(pressure, sample);

            if closed {
                break;
            }
        }

        self.stats.set_state(LoopState::Stopped);
        info!("Processing loop stopped");
    }

    /// Fill the buffer up to the current batch size or until `deadline`. Returns `true`
    /// once the queue is closed and empty.
    async fn collect(
        &mut self,
        rx: &mut Receiver<MetricPoint>,
        deadline: tokio::time::Instant,
    ) -> bool {
        let target = self.batcher.current_size();
        while self.buffer.len() < target {
            let remaining = target - self.buffer.len();
            let draining = self.mode == Mode::Draining;
            let wake = tokio::select! {
                biased;
                () = self.cancel.cancelled(), if !draining => Wake::Cancelled,
                result = timeout_at(deadline, rx.recv_many(&mut self.incoming, remaining)) => {
                    match result {
                        Ok(received) => Wake::Received(received),
                        Err(_) => Wake::Deadline,
                    }
                }
            };

            match wake {
                Wake::Cancelled => {
                    debug!(
                        "Shutdown requested, draining {} queued points",
                        self.queue.len()
                    );
                    self.mode = Mode::Draining;
                    self.stats.set_state(LoopState::Stopping);
                    rx.close();
                }
                Wake::Received(0) => return true,
                Wake::Received(received) => {
                    self.stats.record_buffered(received);
                    self.buffer.extend(self.incoming.drain(..));
                }
                Wake::Deadline => break,
            }
        }
        false
    }

    async fn flush(&mut self) -> Option<FlushSample> {
        if self.buffer.is_empty() {
            return None;
        }

        let points = self.buffer.len();
        self.stats.begin_flush(self.buffer.groups().len());
        let started = Instant::now();
        let outcome = self.client.deliver_all(self.buffer.groups()).await;
        let elapsed = started.elapsed();
        let mean_point_latency = mean_latency(&self.buffer, Instant::now());
        self.buffer.clear();

        if outcome.failed_batches > 0 {
            warn!(
                "{} of {} batches failed in the last flush",
                outcome.failed_batches,
                outcome.delivered_batches + outcome.failed_batches
            );
        }
        debug!(
            "Flushed {} points in {} ms ({} mode)",
            points,
            elapsed.as_millis(),
            self.mode
        );

        self.batcher
            .adjust(self.queue.len(), self.queue.max_capacity(), elapsed);
        self.stats.set_current_batch_size(self.batcher.current_size());

        Some(FlushSample {
            points,
            elapsed,
            mean_point_latency,
        })
    }
}

/// Best-effort delivery of whatever is still queued after the loop was aborted. Each
/// batch gets a single attempt.
pub async fn flush_residual(
    rx: &IngestReceiver,
    client: &DeliveryClient,
    stats: &RunningStats,
    batch_size: usize,
) -> usize {
    let mut rx = rx.lock().await;
    rx.close();

    let mut buffer = MetricBuffer::with_capacity(batch_size);
    let mut flushed = 0;
    loop {
        while buffer.len() < batch_size {
            match rx.try_recv() {
                Ok(point) => buffer.add(point),
                Err(_) => break,
            }
        }
        if buffer.is_empty() {
            break;
        }
        flushed += buffer.len();
        client.deliver_all_once(buffer.groups()).await;
        buffer.clear();
    }

    stats.set_state(LoopState::Stopped);
    if flushed > 0 {
        info!("Flushed {} residual points after forced shutdown", flushed);
    }
    flushed
}

fn mean_latency(buffer: &MetricBuffer, now: Instant) -> Duration {
    let total: Duration = buffer
        .points()
        .map(|point| now.saturating_duration_since(point.enqueued_at))
        .sum();
    total / u32::try_from(buffer.len().max(1)).unwrap_or(u32::MAX)
}
