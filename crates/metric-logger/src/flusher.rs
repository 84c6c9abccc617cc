// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::{Backoff, Compression, LoggerConfig};
use crate::errors::{DeliveryError, LoggerError};
use crate::metric::Batch;
use crate::stats::RunningStats;
use flate2::write::GzEncoder;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Ships batches to the collector endpoint.
///
/// Owns the single HTTP connection pool of the logger. Every attempt is a POST of one
/// [`Batch`] serialized as JSON, compressed when a codec is configured.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    codec: Option<Compression>,
    retry_attempts: u32,
    retry_delay: Duration,
    backoff: Backoff,
    request_timeout: Duration,
    concurrency: usize,
    stats: Arc<RunningStats>,
}

/// Result of delivering one flush worth of batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub delivered_batches: usize,
    pub failed_batches: usize,
}

impl DeliveryClient {
    pub fn new(config: &LoggerConfig, stats: Arc<RunningStats>) -> Result<Self, LoggerError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(60)))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| LoggerError::ClientBuild(e.to_string()))?;

        let codec = config.codec();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(codec) = codec {
            headers.insert(
                CONTENT_ENCODING,
                HeaderValue::from_static(codec.content_encoding()),
            );
        }

        Ok(DeliveryClient {
            client,
            endpoint: config.endpoint.clone(),
            headers,
            codec,
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: config.retry_delay,
            backoff: config.backoff,
            request_timeout: config.request_timeout,
            concurrency: config.delivery_concurrency.max(1),
            stats,
        })
    }

    /// Serialize and compress a batch into a request body.
    pub fn encode(&self, batch: &Batch) -> Result<Vec<u8>, DeliveryError> {
        let json = serde_json::to_vec(batch)
            .map_err(|e| DeliveryError::Payload(format!("failed to serialize batch: {e}")))?;
        match self.codec {
            None => Ok(json),
            Some(codec) => compress(&json, codec),
        }
    }

    /// Deliver every batch of a flush. Batches of different names may run concurrently;
    /// the call returns once all of them succeeded or gave up.
    pub async fn deliver_all(&self, batches: &[Batch]) -> FlushOutcome {
        let results: Vec<bool> = if self.concurrency == 1 {
            let mut results = Vec::with_capacity(batches.len());
            for batch in batches {
                results.push(self.deliver(batch, self.retry_attempts).await);
            }
            results
        } else {
            // Collected first so the spawned processing loop stays `Send`.
            let pending: Vec<_> = batches
                .iter()
                .map(|batch| self.deliver(batch, self.retry_attempts))
                .collect();
            stream::iter(pending)
                .buffer_unordered(self.concurrency)
                .collect()
                .await
        };
        outcome(&results)
    }

    /// One attempt per batch, no backoff. Used for the final flush after a forced stop.
    pub async fn deliver_all_once(&self, batches: &[Batch]) -> FlushOutcome {
        let mut results = Vec::with_capacity(batches.len());
        for batch in batches {
            results.push(self.deliver(batch, 1).await);
        }
        outcome(&results)
    }

    /// Deliver a batch with up to `attempts` attempts and update the delivery counters.
    /// Returns `true` when the collector accepted the batch.
    pub async fn deliver(&self, batch: &Batch, attempts: u32) -> bool {
        if batch.is_empty() {
            return true;
        }

        let body = match self.encode(batch) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to prepare payload for {}. Data dropped: {}", batch.name, e);
                self.stats.record_failed_batch(batch.len());
                return false;
            }
        };

        let req = self
            .client
            .post(&self.endpoint)
            .timeout(self.request_timeout)
            .headers(self.headers.clone())
            .body(body);

        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            let time = Instant::now();
            let Some(cloned_req) = req.try_clone() else {
                error!("Failed to clone request for {}. Data dropped", batch.name);
                self.stats.record_failed_batch(batch.len());
                return false;
            };

            match send(cloned_req).await {
                Ok(()) => {
                    debug!(
                        "Delivered {} points of {} in {} ms",
                        batch.len(),
                        batch.name,
                        time.elapsed().as_millis()
                    );
                    self.stats.record_processed(batch.len());
                    return true;
                }
                Err(e) if !e.is_retryable() => {
                    error!("Failed to deliver {}. Data dropped: {}", batch.name, e);
                    self.stats.record_failed_batch(batch.len());
                    return false;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts {
                        error!(
                            "Failed to deliver {} points of {} after {} attempts: {}",
                            batch.len(),
                            batch.name,
                            attempt,
                            e
                        );
                        self.stats.record_failed_batch(batch.len());
                        return false;
                    }
                    let delay = self.backoff.delay(self.retry_delay, attempt - 1);
                    warn!(
                        "Attempt {} of {} for {} failed, retrying in {} ms: {}",
                        attempt,
                        attempts,
                        batch.name,
                        delay.as_millis(),
                        e
                    );
                    self.stats.record_retry();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<(), DeliveryError> {
    let resp = req
        .send()
        .await
        .map_err(|e| DeliveryError::Destination(e.status(), e.to_string()))?;
    let status = resp.status();
    if status.as_u16() < 400 {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(DeliveryError::Destination(
        Some(status),
        format!("collector answered {status}: {body}"),
    ))
}

fn compress(data: &[u8], codec: Compression) -> Result<Vec<u8>, DeliveryError> {
    match codec {
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .and_then(|()| encoder.finish())
                .map_err(|e| DeliveryError::Payload(format!("failed to gzip batch: {e}")))
        }
        Compression::Zstd { level } => zstd::encode_all(data, level)
            .map_err(|e| DeliveryError::Payload(format!("failed to zstd batch: {e}"))),
    }
}

fn outcome(results: &[bool]) -> FlushOutcome {
    let delivered_batches = results.iter().filter(|ok| **ok).count();
    FlushOutcome {
        delivered_batches,
        failed_batches: results.len() - delivered_batches,
    }
}
