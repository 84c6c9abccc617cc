// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use flate2::read::GzDecoder;
use metric_logger::{
    FlushIntervals, LogError, LoggerConfig, LoggerError, LoopState, MetricLogger, Mode,
    StatsSnapshot,
};
use mockito::Server;
use serde_json::Value;
use std::io::Read;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, timeout, Duration};

fn test_config(endpoint: String) -> LoggerConfig {
    LoggerConfig {
        retry_delay: Duration::from_millis(1),
        flush_intervals: FlushIntervals {
            min: Duration::from_millis(10),
            normal: Duration::from_millis(20),
            max: Duration::from_millis(50),
            drain: Duration::from_millis(5),
        },
        ..LoggerConfig::new("run", endpoint)
    }
}

fn accounted(stats: &StatsSnapshot) -> u64 {
    stats.processed_count
        + stats.dropped_count
        + stats.rejected_count
        + stats.failed_points
        + stats.queue_size as u64
}

type Captured = Arc<Mutex<Vec<Value>>>;

/// Mock that records every JSON body it receives, decompressing gzip bodies.
async fn capturing_mock(server: &mut Server, captured: &Captured) -> mockito::Mock {
    let captured = Arc::clone(captured);
    server
        .mock("POST", "/batch")
        .with_status(200)
        .with_body_from_request(move |request| {
            let raw = request.body().cloned().unwrap_or_default();
            let gzipped = request
                .header("content-encoding")
                .iter()
                .any(|value| value.as_bytes() == b"gzip");
            let json = if gzipped {
                let mut decoded = Vec::new();
                GzDecoder::new(raw.as_slice())
                    .read_to_end(&mut decoded)
                    .expect("failed to gunzip body");
                decoded
            } else {
                raw
            };
            let value: Value = serde_json::from_slice(&json).expect("body is not json");
            captured.lock().expect("lock poisoned").push(value);
            Vec::new()
        })
        .expect_at_least(1)
        .create_async()
        .await
}

fn curve(captured: &Captured, name: &str) -> Vec<f64> {
    captured
        .lock()
        .expect("lock poisoned")
        .iter()
        .filter(|body| body["name"] == name)
        .flat_map(|body| {
            body["xCoordinates"]
                .as_array()
                .expect("xCoordinates is an array")
                .iter()
                .map(|x| x.as_f64().expect("x is a number"))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[tokio::test]
async fn stats_are_zero_after_construction() {
    let logger = MetricLogger::new(test_config("http://127.0.0.1:9/batch".to_string()))
        .expect("failed to start logger");

    let stats = logger.get_stats();
    assert_eq!(stats.processed_count, 0);
    assert_eq!(stats.dropped_count, 0);
    assert_eq!(stats.failed_batches, 0);
    assert_eq!(stats.retried_batches, 0);
    assert_eq!(stats.queue_size, 0);
    assert_eq!(stats.current_batch_size, 50);
    assert_eq!(stats.mode, Mode::Normal);
    assert_eq!(logger.state(), LoopState::Running);
}

#[tokio::test]
async fn overflow_is_dropped_and_accounted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/batch")
        .with_status(200)
        .create_async()
        .await;

    let logger = MetricLogger::new(LoggerConfig {
        max_queue_size: 10,
        ..test_config(format!("{}/batch", server.url()))
    })
    .expect("failed to start logger");

    let accepted = (0..15)
        .filter(|step| logger.log(f64::from(*step), 0.5, "loss"))
        .count();
    assert_eq!(accepted, 10);
    assert!(logger.get_stats().dropped_count >= 5);

    logger
        .stop(Duration::from_secs(1))
        .await
        .expect("logger did not drain");

    mock.assert_async().await;
    let stats = logger.get_stats();
    assert_eq!(stats.processed_count + stats.dropped_count, 15);
    assert_eq!(stats.queue_size, 0);
    assert_eq!(logger.state(), LoopState::Stopped);
}

#[tokio::test]
async fn failing_endpoint_exhausts_retries() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/batch")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let logger = MetricLogger::new(LoggerConfig {
        retry_attempts: 3,
        ..test_config(format!("{}/batch", server.url()))
    })
    .expect("failed to start logger");

    assert!(logger.log(1.0, 0.25, "loss"));
    logger
        .stop(Duration::from_secs(2))
        .await
        .expect("logger did not drain");

    mock.assert_async().await;
    let stats = logger.get_stats();
    assert_eq!(stats.failed_batches, 1);
    assert_eq!(stats.retried_batches, 2);
    assert_eq!(stats.failed_points, 1);
    assert_eq!(stats.processed_count, 0);
}

#[tokio::test]
async fn stop_drains_queued_points() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/batch")
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;

    let logger = MetricLogger::new(test_config(format!("{}/batch", server.url())))
        .expect("failed to start logger");

    for step in 0..50 {
        assert!(logger.log(f64::from(step), f64::from(step) * 0.1, "loss"));
    }
    logger
        .stop(Duration::from_secs(1))
        .await
        .expect("logger did not drain");

    mock.assert_async().await;
    let stats = logger.get_stats();
    assert_eq!(stats.processed_count, 50);
    assert_eq!(accounted(&stats), 50);
    assert_eq!(stats.mode, Mode::Draining);
    assert_eq!(stats.state, LoopState::Stopped);
}

#[tokio::test]
async fn points_of_a_name_arrive_in_order() {
    let mut server = Server::new_async().await;
    let captured = Captured::default();
    let mock = capturing_mock(&mut server, &captured).await;

    let logger = MetricLogger::new(LoggerConfig {
        initial_batch_size: 5,
        min_batch_size: 5,
        max_batch_size: 5,
        ..test_config(format!("{}/batch", server.url()))
    })
    .expect("failed to start logger");

    for step in 0..20 {
        let x = f64::from(step);
        assert!(logger.log(x, x, "loss"));
        assert!(logger.log(x, 1.0 - x / 20.0, "accuracy"));
        if step % 4 == 0 {
            // Let the loop interleave flushes with logging.
            sleep(Duration::from_millis(15)).await;
        }
    }
    logger
        .stop(Duration::from_secs(2))
        .await
        .expect("logger did not drain");

    mock.assert_async().await;
    let expected: Vec<f64> = (0..20).map(f64::from).collect();
    assert_eq!(curve(&captured, "run_loss"), expected);
    assert_eq!(curve(&captured, "run_accuracy"), expected);
    assert_eq!(logger.get_stats().processed_count, 40);
}

#[tokio::test]
async fn gzip_body_is_valid_json() {
    let mut server = Server::new_async().await;
    let captured = Captured::default();
    let mock = capturing_mock(&mut server, &captured).await;

    let logger = MetricLogger::new(LoggerConfig {
        enable_compression: true,
        ..test_config(format!("{}/batch", server.url()))
    })
    .expect("failed to start logger");

    assert_eq!(logger.log_many("loss", [(0.0, 0.9), (1.0, 0.8)]), 2);
    logger
        .stop(Duration::from_secs(1))
        .await
        .expect("logger did not drain");

    mock.assert_async().await;
    let bodies = captured.lock().expect("lock poisoned").clone();
    assert_eq!(
        bodies,
        vec![serde_json::json!({
            "name": "run_loss",
            "xCoordinates": [0.0, 1.0],
            "yCoordinates": [0.9, 0.8],
        })]
    );
}

#[tokio::test]
async fn log_is_refused_after_stop() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/batch")
        .with_status(200)
        .create_async()
        .await;

    let logger = MetricLogger::new(test_config(format!("{}/batch", server.url())))
        .expect("failed to start logger");
    logger
        .stop(Duration::from_secs(1))
        .await
        .expect("logger did not drain");

    assert!(!logger.log(1.0, 1.0, "loss"));
    assert_eq!(logger.try_log(1.0, 1.0, "loss"), Err(LogError::Stopped));
    // A second stop is a no-op.
    assert!(logger.stop(Duration::from_millis(10)).await.is_ok());
    let stats = logger.get_stats();
    assert_eq!(accounted(&stats), 0);
}

#[tokio::test]
async fn rejected_points_are_accounted() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/batch")
        .with_status(200)
        .create_async()
        .await;

    let logger = MetricLogger::new(test_config(format!("{}/batch", server.url())))
        .expect("failed to start logger");
    assert!(logger.log(0.0, 1.0, "loss"));
    assert!(!logger.log(1.0, f64::NAN, "loss"));
    assert_eq!(
        logger.log_many("loss", [(2.0, 1.0), (f64::INFINITY, 1.0), (3.0, 1.0)]),
        2
    );
    logger
        .stop(Duration::from_secs(1))
        .await
        .expect("logger did not drain");

    let stats = logger.get_stats();
    assert_eq!(stats.rejected_count, 2);
    assert_eq!(stats.processed_count, 3);
    assert_eq!(accounted(&stats), 5);
}

#[tokio::test]
async fn shutdown_timeout_forces_final_flush() {
    // Accepts connections through the backlog but never answers.
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind listener");
    let endpoint = format!(
        "http://{}/batch",
        listener.local_addr().expect("listener has an address")
    );

    let logger = MetricLogger::new(LoggerConfig {
        initial_batch_size: 5,
        min_batch_size: 5,
        max_batch_size: 5,
        request_timeout: Duration::from_millis(200),
        ..test_config(endpoint)
    })
    .expect("failed to start logger");

    for step in 0..20 {
        assert!(logger.log(f64::from(step), 0.5, "loss"));
    }

    let result = timeout(Duration::from_secs(10), logger.stop(Duration::from_millis(50)))
        .await
        .expect("stop did not return");
    assert!(matches!(result, Err(LoggerError::ShutdownTimeout(_))));

    let stats = logger.get_stats();
    assert_eq!(stats.state, LoopState::Stopped);
    assert_eq!(stats.processed_count, 0);
    assert_eq!(stats.failed_points, 20);
    assert_eq!(stats.queue_size, 0);
    assert_eq!(accounted(&stats), 20);
    drop(listener);
}

#[tokio::test]
async fn dropping_the_logger_drains_in_background() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/batch")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let logger = MetricLogger::new(test_config(format!("{}/batch", server.url())))
        .expect("failed to start logger");
    assert!(logger.log(0.0, 1.0, "loss"));
    drop(logger);

    let delivered = async {
        while !mock.matched_async().await {
            sleep(Duration::from_millis(10)).await;
        }
    };
    timeout(Duration::from_secs(2), delivered)
        .await
        .expect("queued point was not delivered");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_producers_are_fully_accounted() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/batch")
        .with_status(200)
        .create_async()
        .await;

    let logger = Arc::new(
        MetricLogger::new(LoggerConfig {
            max_queue_size: 50,
            ..test_config(format!("{}/batch", server.url()))
        })
        .expect("failed to start logger"),
    );

    let producers: Vec<_> = (0..8)
        .map(|thread| {
            let logger = Arc::clone(&logger);
            std::thread::spawn(move || {
                let metric_type = format!("loss{thread}");
                (0..2_000)
                    .filter(|step| logger.log(f64::from(*step), 0.5, &metric_type))
                    .count() as u64
            })
        })
        .collect();
    let accepted: u64 = producers
        .into_iter()
        .map(|producer| producer.join().expect("producer panicked"))
        .sum();

    logger
        .stop(Duration::from_secs(5))
        .await
        .expect("logger did not drain");

    let stats = logger.get_stats();
    assert_eq!(stats.queue_size, 0);
    assert_eq!(stats.rejected_count, 0);
    assert_eq!(stats.processed_count + stats.failed_points, accepted);
    assert_eq!(stats.dropped_count, 16_000 - accepted);
    assert_eq!(accounted(&stats), 16_000);
}
