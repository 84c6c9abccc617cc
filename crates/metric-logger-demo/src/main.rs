// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use metric_logger::{Compression, LoggerConfig, LoggerError, MetricLogger};

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5005/batch";
const DEFAULT_NAME: &str = "demo";
const DEFAULT_STEPS: u32 = 500;
const STEP_INTERVAL: Duration = Duration::from_millis(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("METRIC_LOGGER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let endpoint =
        env::var("METRIC_LOGGER_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
    let name = env::var("METRIC_LOGGER_NAME").unwrap_or_else(|_| DEFAULT_NAME.to_string());
    let steps = env::var("METRIC_LOGGER_STEPS")
        .ok()
        .and_then(|val| val.parse::<u32>().ok())
        .unwrap_or(DEFAULT_STEPS);
    let compression = match env::var("METRIC_LOGGER_COMPRESSION")
        .map(|val| val.to_lowercase())
        .as_deref()
    {
        Ok("gzip") => Some(Compression::Gzip),
        Ok("zstd") => Some(Compression::Zstd { level: 3 }),
        Ok("") | Ok("none") | Err(_) => None,
        Ok(other) => {
            warn!("Unknown compression '{}', sending uncompressed", other);
            None
        }
    };

    let mut config = LoggerConfig::new(name, endpoint);
    if let Some(codec) = compression {
        config.enable_compression = true;
        config.compression = codec;
    }

    let logger = match MetricLogger::new(config) {
        Ok(logger) => logger,
        Err(e) => {
            error!("Error creating metric logger: {e}");
            return;
        }
    };
    info!(
        "Logging {} steps of {} to {}",
        steps,
        logger.config().name,
        logger.config().endpoint
    );

    let mut ticker = interval(STEP_INTERVAL);
    for step in 0..steps {
        ticker.tick().await;
        let x = f64::from(step);
        let loss = (-x / 100.0).exp() + 0.05 * (x / 7.0).sin().abs();
        let accuracy = 1.0 - (-x / 150.0).exp();
        if !logger.log(x, loss, "loss") {
            debug!("Point {} of loss was not enqueued", step);
        }
        logger.log_many("accuracy", [(x, accuracy)]);
    }

    match logger.stop(SHUTDOWN_TIMEOUT).await {
        Ok(()) => info!("Metric logger drained"),
        Err(LoggerError::ShutdownTimeout(timeout)) => {
            warn!("Metric logger did not drain within {:?}", timeout);
        }
        Err(e) => error!("Error stopping metric logger: {e}"),
    }

    let stats = logger.get_stats();
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => info!("Final statistics: {}", json),
        Err(e) => error!("Failed to serialize statistics: {e}"),
    }
}
