// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::LoggerConfig;
use crate::errors::{LogError, LoggerError};
use crate::flusher::DeliveryClient;
use crate::metric::MetricPoint;
use crate::processing_loop::{flush_residual, ProcessingLoop};
use crate::queue::{IngestQueue, IngestReceiver};
use crate::stats::{LoopState, RunningStats, StatsSnapshot};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use ustr::ustr;

/// Client handle for logging metric curves.
///
/// `log` only enqueues, it never touches the network and never waits: the points are
/// batched and delivered by a background task spawned on the current tokio runtime.
/// The handle is `Send + Sync` and can be shared across producers behind an `Arc`.
///
/// Dropping the logger requests a drain without waiting for it. Call [`MetricLogger::stop`]
/// to wait for the queue to be delivered.
pub struct MetricLogger {
    config: Arc<LoggerConfig>,
    queue: IngestQueue,
    rx: IngestReceiver,
    client: DeliveryClient,
    stats: Arc<RunningStats>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MetricLogger {
    /// Validate `config` and start the processing loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| LoggerError::NoRuntime)?;

        let config = Arc::new(config);
        let stats = Arc::new(RunningStats::new(
            config.stats_window,
            config.initial_batch_size,
        ));
        let (queue, rx) = IngestQueue::bounded(config.max_queue_size);
        let client = DeliveryClient::new(&config, Arc::clone(&stats))?;
        let cancel = CancellationToken::new();

        let processing = ProcessingLoop::new(
            &config,
            queue.clone(),
            Arc::clone(&rx),
            client.clone(),
            Arc::clone(&stats),
            cancel.clone(),
        );
        let handle = runtime.spawn(processing.run());
        debug!(
            "Metric logger {} started, shipping to {}",
            config.name, config.endpoint
        );

        Ok(MetricLogger {
            config,
            queue,
            rx,
            client,
            stats,
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Enqueue one point of `{name}_{metric_type}`. Returns `false` when the point was
    /// dropped or refused.
    pub fn log(&self, step: f64, value: f64, metric_type: &str) -> bool {
        self.try_log(step, value, metric_type).is_ok()
    }

    /// Like [`MetricLogger::log`] but tells why a point was not enqueued.
    pub fn try_log(&self, step: f64, value: f64, metric_type: &str) -> Result<(), LogError> {
        if self.cancel.is_cancelled() {
            return Err(LogError::Stopped);
        }
        let name = ustr(&self.config.metric_name(metric_type));
        let point = MetricPoint::new(name, step, value).inspect_err(|_| {
            self.stats.record_rejected();
        })?;
        self.queue.push(point).inspect_err(|e| {
            if *e == LogError::QueueFull {
                trace!("Queue full, dropping point {} of {}", step, name);
                self.stats.record_dropped();
            }
        })
    }

    /// Enqueue a sequence of `(step, value)` points of one metric type. Returns how many
    /// were enqueued; the others are counted as dropped or rejected.
    pub fn log_many(
        &self,
        metric_type: &str,
        points: impl IntoIterator<Item = (f64, f64)>,
    ) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }
        let name = ustr(&self.config.metric_name(metric_type));
        let mut enqueued = 0;
        for (step, value) in points {
            let Ok(point) = MetricPoint::new(name, step, value) else {
                self.stats.record_rejected();
                continue;
            };
            match self.queue.push(point) {
                Ok(()) => enqueued += 1,
                Err(LogError::QueueFull) => self.stats.record_dropped(),
                Err(_) => break,
            }
        }
        enqueued
    }

    #[must_use]
    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.queue.len())
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.stats.state()
    }

    #[must_use]
    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Stop accepting points and wait up to `timeout` for the queue to drain.
    ///
    /// On timeout the processing loop is cancelled and the points still queued get one
    /// delivery attempt each before `ShutdownTimeout` is returned. Statistics stay
    /// readable afterwards. Calling `stop` again returns immediately.
    pub async fn stop(&self, timeout: Duration) -> Result<(), LoggerError> {
        self.cancel.cancel();
        let handle = {
            #[allow(clippy::expect_used)]
            let mut handle = self.handle.lock().expect("lock poisoned");
            handle.take()
        };
        let Some(mut handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Processing loop failed: {}", e);
                self.stats.abandon_in_flight();
                self.flush_residual().await;
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Metric logger did not drain within {} ms, cancelling processing loop",
                    timeout.as_millis()
                );
                handle.abort();
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!("Processing loop failed: {}", e);
                    }
                }
                let lost = self.stats.abandon_in_flight();
                if lost > 0 {
                    warn!("{} in-flight points of the cancelled loop counted as failed", lost);
                }
                self.flush_residual().await;
                Err(LoggerError::ShutdownTimeout(timeout))
            }
        }
    }

    async fn flush_residual(&self) {
        flush_residual(
            &self.rx,
            &self.client,
            &self.stats,
            self.config.max_batch_size,
        )
        .await;
    }
}

impl Drop for MetricLogger {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
