// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants;
use crate::errors::LoggerError;
use reqwest::Url;
use std::time::Duration;

/// Growth curve of the delay between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `retry_delay * (attempt + 1)`
    Linear,
    /// `retry_delay * 2^attempt`
    Exponential,
}

impl Backoff {
    /// Delay to sleep after the failed attempt number `attempt` (zero based).
    #[must_use]
    pub fn delay(self, retry_delay: Duration, attempt: u32) -> Duration {
        match self {
            Backoff::Linear => retry_delay.saturating_mul(attempt.saturating_add(1)),
            Backoff::Exponential => {
                retry_delay.saturating_mul(2_u32.checked_pow(attempt).unwrap_or(u32::MAX))
            }
        }
    }
}

/// Body encoding used when compression is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd { level: i32 },
}

impl Compression {
    /// Value of the `Content-Encoding` header.
    #[must_use]
    pub fn content_encoding(self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Zstd { .. } => "zstd",
        }
    }
}

/// Bounds of the adaptive flush interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushIntervals {
    /// Used under sustained high queue pressure.
    pub min: Duration,
    /// Target during normal operation.
    pub normal: Duration,
    /// Ceiling when the queue is idle.
    pub max: Duration,
    /// Fixed interval while draining on shutdown.
    pub drain: Duration,
}

impl Default for FlushIntervals {
    fn default() -> Self {
        FlushIntervals {
            min: constants::DEFAULT_MIN_FLUSH_INTERVAL,
            normal: constants::DEFAULT_NORMAL_FLUSH_INTERVAL,
            max: constants::DEFAULT_MAX_FLUSH_INTERVAL,
            drain: constants::DEFAULT_DRAIN_FLUSH_INTERVAL,
        }
    }
}

/// Configuration of a [`crate::MetricLogger`].
///
/// The logger validates the configuration when it is constructed and keeps it behind an
/// `Arc` afterwards. Changing settings means building a new logger.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Prefix of every metric name: points are shipped as `{name}_{metric_type}`.
    pub name: String,
    /// Collector URL every batch is POSTed to.
    pub endpoint: String,
    /// Capacity of the ingest queue. Points logged while it is full are dropped.
    pub max_queue_size: usize,
    pub initial_batch_size: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    /// Total number of delivery attempts per batch, first attempt included.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub backoff: Backoff,
    /// Timeout of a single delivery attempt.
    pub request_timeout: Duration,
    pub enable_compression: bool,
    pub compression: Compression,
    pub flush_intervals: FlushIntervals,
    /// Number of metric names delivered concurrently within one flush.
    pub delivery_concurrency: usize,
    /// Window of the rolling statistics reported by `get_stats`.
    pub stats_window: usize,
}

impl LoggerConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        LoggerConfig {
            name: name.into(),
            endpoint: endpoint.into(),
            max_queue_size: constants::DEFAULT_MAX_QUEUE_SIZE,
            initial_batch_size: constants::DEFAULT_INITIAL_BATCH_SIZE,
            min_batch_size: constants::DEFAULT_MIN_BATCH_SIZE,
            max_batch_size: constants::DEFAULT_MAX_BATCH_SIZE,
            retry_attempts: constants::DEFAULT_RETRY_ATTEMPTS,
            retry_delay: constants::DEFAULT_RETRY_DELAY,
            backoff: Backoff::Exponential,
            request_timeout: constants::DEFAULT_REQUEST_TIMEOUT,
            enable_compression: false,
            compression: Compression::Gzip,
            flush_intervals: FlushIntervals::default(),
            delivery_concurrency: 1,
            stats_window: constants::DEFAULT_STATS_WINDOW,
        }
    }

    /// Full metric name for a metric type.
    #[must_use]
    pub fn metric_name(&self, metric_type: &str) -> String {
        format!("{}_{}", self.name, metric_type)
    }

    /// The compression codec to apply, if any.
    #[must_use]
    pub fn codec(&self) -> Option<Compression> {
        self.enable_compression.then_some(self.compression)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LoggerError> {
        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty"));
        }

        let url = Url::parse(&self.endpoint)
            .map_err(|e| invalid(&format!("endpoint '{}' is not a URL: {e}", self.endpoint)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid(&format!(
                "endpoint scheme must be http or https, got '{}'",
                url.scheme()
            )));
        }

        for (field, value) in [
            ("max_queue_size", self.max_queue_size),
            ("initial_batch_size", self.initial_batch_size),
            ("min_batch_size", self.min_batch_size),
            ("max_batch_size", self.max_batch_size),
            ("delivery_concurrency", self.delivery_concurrency),
            ("stats_window", self.stats_window),
        ] {
            if value == 0 {
                return Err(invalid(&format!("{field} must be greater than 0")));
            }
        }

        if self.max_queue_size > constants::MAX_QUEUE_SIZE {
            return Err(invalid(&format!(
                "max_queue_size must be at most {}, got {}",
                constants::MAX_QUEUE_SIZE,
                self.max_queue_size
            )));
        }
        for (field, value) in [
            ("max_batch_size", self.max_batch_size),
            ("stats_window", self.stats_window),
        ] {
            if value > constants::MAX_PREALLOCATED {
                return Err(invalid(&format!(
                    "{field} must be at most {}, got {value}",
                    constants::MAX_PREALLOCATED
                )));
            }
        }

        if self.min_batch_size > self.initial_batch_size
            || self.initial_batch_size > self.max_batch_size
        {
            return Err(invalid(&format!(
                "batch sizes must satisfy min <= initial <= max, got {} / {} / {}",
                self.min_batch_size, self.initial_batch_size, self.max_batch_size
            )));
        }

        if self.retry_attempts == 0 {
            return Err(invalid("retry_attempts must be at least 1"));
        }

        let intervals = &self.flush_intervals;
        for (field, value) in [
            ("retry_delay", self.retry_delay),
            ("request_timeout", self.request_timeout),
            ("flush_intervals.min", intervals.min),
            ("flush_intervals.normal", intervals.normal),
            ("flush_intervals.max", intervals.max),
            ("flush_intervals.drain", intervals.drain),
        ] {
            if value.is_zero() {
                return Err(invalid(&format!("{field} must be greater than 0")));
            }
        }

        if intervals.min > intervals.normal || intervals.normal > intervals.max {
            return Err(invalid(
                "flush intervals must satisfy min <= normal <= max",
            ));
        }

        if let Compression::Zstd { level } = self.compression {
            if !zstd::compression_level_range().contains(&level) {
                return Err(invalid(&format!("zstd level {level} is out of range")));
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> LoggerError {
    LoggerError::InvalidConfig(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> LoggerConfig {
        LoggerConfig::new("run", "http://127.0.0.1:5005/batch")
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_metric_name_is_prefixed() {
        assert_eq!(base().metric_name("loss"), "run_loss");
    }

    #[test]
    fn test_validate_empty_name() {
        let config = LoggerConfig {
            name: "  ".to_string(),
            ..base()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_endpoint() {
        for endpoint in ["", "not a url", "ftp://127.0.0.1/batch"] {
            let config = LoggerConfig {
                endpoint: endpoint.to_string(),
                ..base()
            };
            assert!(
                config.validate().is_err(),
                "endpoint '{}' should be rejected",
                endpoint
            );
        }
    }

    #[test]
    fn test_validate_zero_sizes() {
        let cases = [
            LoggerConfig {
                max_queue_size: 0,
                ..base()
            },
            LoggerConfig {
                min_batch_size: 0,
                ..base()
            },
            LoggerConfig {
                delivery_concurrency: 0,
                ..base()
            },
            LoggerConfig {
                retry_attempts: 0,
                ..base()
            },
        ];
        for case in cases {
            assert!(case.validate().is_err(), "{case:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_oversized_capacities() {
        let cases = [
            LoggerConfig {
                max_queue_size: usize::MAX,
                ..base()
            },
            LoggerConfig {
                max_queue_size: constants::MAX_QUEUE_SIZE + 1,
                ..base()
            },
            LoggerConfig {
                max_batch_size: usize::MAX,
                ..base()
            },
            LoggerConfig {
                stats_window: constants::MAX_PREALLOCATED + 1,
                ..base()
            },
        ];
        for case in cases {
            assert!(
                matches!(case.validate(), Err(LoggerError::InvalidConfig(_))),
                "{case:?} should be rejected"
            );
        }

        let largest = LoggerConfig {
            max_queue_size: constants::MAX_QUEUE_SIZE,
            ..base()
        };
        assert!(largest.validate().is_ok());
    }

    #[test]
    fn test_validate_batch_size_order() {
        let config = LoggerConfig {
            initial_batch_size: 10,
            min_batch_size: 20,
            max_batch_size: 30,
            ..base()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_durations() {
        let config = LoggerConfig {
            request_timeout: Duration::ZERO,
            ..base()
        };
        assert!(config.validate().is_err());

        let config = LoggerConfig {
            flush_intervals: FlushIntervals {
                drain: Duration::ZERO,
                ..FlushIntervals::default()
            },
            ..base()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_interval_order() {
        let config = LoggerConfig {
            flush_intervals: FlushIntervals {
                min: Duration::from_secs(20),
                ..FlushIntervals::default()
            },
            ..base()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zstd_level() {
        let config = LoggerConfig {
            compression: Compression::Zstd { level: 1_000 },
            ..base()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_codec_follows_flag() {
        assert_eq!(base().codec(), None);
        let config = LoggerConfig {
            enable_compression: true,
            ..base()
        };
        assert_eq!(config.codec(), Some(Compression::Gzip));
    }

    #[test]
    fn test_backoff_delays() {
        let delay = Duration::from_millis(100);
        assert_eq!(Backoff::Linear.delay(delay, 0), Duration::from_millis(100));
        assert_eq!(Backoff::Linear.delay(delay, 2), Duration::from_millis(300));
        assert_eq!(Backoff::Exponential.delay(delay, 0), Duration::from_millis(100));
        assert_eq!(Backoff::Exponential.delay(delay, 3), Duration::from_millis(800));
        // Huge attempt counts saturate instead of overflowing.
        assert!(Backoff::Exponential.delay(delay, 64) > Duration::from_secs(3600));
    }
}
