//! Overdose Risk Pipeline - Main Entry Point
//!
//! Consumes patient records from NATS, scores them against the fitted
//! artifacts, and replies with a prediction or an error response.

use anyhow::Result;
use futures::StreamExt;
use overdose_risk_pipeline::{
    config::AppConfig,
    consumer::RequestConsumer,
    metrics::{MetricsReporter, PipelineMetrics},
    pipeline::RiskPipeline,
    producer::ResponsePublisher,
    PipelineError, PredictionRequest, PredictionResponse,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so its level can seed the filter
    let config = AppConfig::load()?;

    let rust_log = std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(
            config.logging.filter_directives(rust_log.as_deref()),
        )?)
        .init();

    info!("Starting Overdose Risk Pipeline");
    info!(
        load_mode = ?config.artifacts.load_mode,
        missing_fields = ?config.pipeline.missing_fields,
        aliases = config.pipeline.field_aliases.len(),
        "Configuration loaded successfully"
    );

    // Load artifacts (start-up mode) or prepare the per-request loader
    let pipeline = Arc::new(RiskPipeline::from_config(&config)?);
    info!(artifacts_dir = %config.artifacts.dir, "Risk pipeline initialized");

    let metrics = Arc::new(PipelineMetrics::new());

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = RequestConsumer::new(client.clone(), &config.nats.request_subject)
        .with_queue_group(config.nats.queue_group.clone());
    let publisher = ResponsePublisher::new(client.clone(), &config.nats.response_subject);

    let num_workers = config.pipeline.workers.max(1);
    let timeout = Duration::from_millis(config.pipeline.timeout_ms);
    info!(
        workers = num_workers,
        timeout_ms = config.pipeline.timeout_ms,
        request_subject = %config.nats.request_subject,
        response_subject = %publisher.subject(),
        "Starting request processing loop"
    );

    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    let reporter_handle = tokio::spawn(reporter.start());

    let mut subscription = consumer.subscribe().await?;

    loop {
        let message = tokio::select! {
            message = subscription.next() => match message {
                Some(message) => message,
                None => {
                    warn!("Request subscription closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        };

        // Acquire permit (limits concurrent tasks)
        let permit = semaphore.clone().acquire_owned().await?;

        let pipeline = pipeline.clone();
        let publisher = publisher.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();

            let response = match PredictionRequest::from_payload(&message.payload) {
                Ok(request) => score(&pipeline, &metrics, request, timeout, start_time).await,
                Err(e) => {
                    let e = PipelineError::from(e);
                    warn!(error = %e, "Failed to deserialize prediction request");
                    metrics.record_failure(start_time.elapsed(), e.kind());
                    PredictionResponse::failure(uuid::Uuid::new_v4().to_string(), &e)
                }
            };
            let response = response.with_processing_time(start_time.elapsed());

            if let Err(e) = publisher.publish(&response, message.reply.as_ref()).await {
                error!(
                    request_id = %response.request_id,
                    error = %e,
                    "Failed to publish prediction response"
                );
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                let processing_stats = metrics.get_processing_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} req/s", metrics.get_throughput()),
                    avg_latency_us = processing_stats.mean_us,
                    "Processing milestone"
                );
            }

            drop(permit);
        });
    }

    // Wait for in-flight requests before the final summary
    let _drained = semaphore.acquire_many(num_workers as u32).await;
    reporter_handle.abort();

    info!("Pipeline shutting down...");
    metrics.print_summary();

    Ok(())
}

/// Run one request through the pipeline on the blocking pool, bounded by `timeout`
async fn score(
    pipeline: &Arc<RiskPipeline>,
    metrics: &PipelineMetrics,
    request: PredictionRequest,
    timeout: Duration,
    start_time: Instant,
) -> PredictionResponse {
    let request_id = request.request_id.clone();
    let pipeline = pipeline.clone();
    let task = tokio::task::spawn_blocking(move || pipeline.predict_detailed(request.patient));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(output))) => {
            let processing_time = start_time.elapsed();
            metrics.record_prediction(processing_time, &output.result);
            metrics.record_input_quality(output.labels_appended, &output.defaulted);

            debug!(
                request_id = %request_id,
                prediction = ?output.result.prediction,
                processing_time_us = processing_time.as_micros(),
                "Request scored"
            );
            PredictionResponse::success(request_id, output.result)
        }
        Ok(Ok(Err(e))) => {
            warn!(request_id = %request_id, kind = e.kind(), error = %e, "Prediction failed");
            metrics.record_failure(start_time.elapsed(), e.kind());
            PredictionResponse::failure(request_id, &e)
        }
        Ok(Err(e)) => {
            error!(request_id = %request_id, error = %e, "Prediction task panicked");
            metrics.record_failure(start_time.elapsed(), "internal");
            PredictionResponse::failure_with(request_id, "internal", e.to_string())
        }
        Err(_) => {
            warn!(
                request_id = %request_id,
                timeout_ms = timeout.as_millis() as u64,
                "Prediction timed out"
            );
            metrics.record_failure(start_time.elapsed(), "timeout");
            PredictionResponse::failure_with(
                request_id,
                "timeout",
                format!("prediction exceeded {}ms", timeout.as_millis()),
            )
        }
    }
}
