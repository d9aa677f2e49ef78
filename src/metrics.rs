//! Performance metrics and statistics tracking for the risk pipeline.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

use crate::types::prediction::PredictionResult;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Requests scored successfully
    pub requests_processed: AtomicU64,
    /// Requests that ended in an error response
    pub requests_failed: AtomicU64,
    /// Unseen categorical labels appended to encoders
    pub labels_appended: AtomicU64,
    /// Failures by error kind
    failures_by_kind: RwLock<HashMap<String, u64>>,
    /// Predicted class counts
    class_counts: RwLock<BTreeMap<i64, u64>>,
    /// How often each feature column was zero-filled
    defaulted_columns: RwLock<HashMap<&'static str, u64>>,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Positive-class probability buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests_processed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            labels_appended: AtomicU64::new(0),
            failures_by_kind: RwLock::new(HashMap::new()),
            class_counts: RwLock::new(BTreeMap::new()),
            defaulted_columns: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a successfully scored request
    pub fn record_prediction(&self, processing_time: Duration, result: &PredictionResult) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(processing_time);

        if let Some(class) = result.predicted_class() {
            if let Ok(mut counts) = self.class_counts.write() {
                *counts.entry(class).or_insert(0) += 1;
            }
        }

        if let Some(p) = result.positive_probability() {
            let bucket = (p.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
            if let Ok(mut buckets) = self.score_buckets.write() {
                buckets[bucket] += 1;
            }
        }
    }

    /// Record a failed request
    pub fn record_failure(&self, processing_time: Duration, kind: &str) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(processing_time);

        if let Ok(mut by_kind) = self.failures_by_kind.write() {
            *by_kind.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    /// Record encoder growth and zero-filled columns for one request
    pub fn record_input_quality(&self, labels_appended: usize, defaulted: &[&'static str]) {
        if labels_appended > 0 {
            self.labels_appended
                .fetch_add(labels_appended as u64, Ordering::Relaxed);
        }

        if defaulted.is_empty() {
            return;
        }
        if let Ok(mut columns) = self.defaulted_columns.write() {
            for column in defaulted {
                *columns.entry(*column).or_insert(0) += 1;
            }
        }
    }

    fn record_processing_time(&self, processing_time: Duration) {
        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted: Vec<u64> = match self.processing_times.read() {
            Ok(times) if !times.is_empty() => times.clone(),
            _ => return ProcessingStats::default(),
        };
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: sorted[count - 1],
        }
    }

    /// Get current throughput (requests per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let total = self.requests_processed.load(Ordering::Relaxed)
            + self.requests_failed.load(Ordering::Relaxed);
        if elapsed > 0.0 {
            total as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get positive-class probability distribution
    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or_default()
    }

    /// Get predicted class counts
    pub fn get_class_counts(&self) -> BTreeMap<i64, u64> {
        self.class_counts
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Get failures by error kind
    pub fn get_failures_by_kind(&self) -> HashMap<String, u64> {
        self.failures_by_kind
            .read()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    /// Zero-fill counts per column, most frequent first
    pub fn get_defaulted_columns(&self) -> Vec<(&'static str, u64)> {
        let mut columns: Vec<(&'static str, u64)> = self
            .defaulted_columns
            .read()
            .map(|c| c.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        columns.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        columns
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let ok_count = self.requests_processed.load(Ordering::Relaxed);
        let failed_count = self.requests_failed.load(Ordering::Relaxed);
        let total = ok_count + failed_count;
        let failure_rate = if total > 0 {
            (failed_count as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║           OVERDOSE RISK PIPELINE - METRICS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Requests Scored:   {:>8}  │  Throughput: {:>6.1} req/s     ║",
            ok_count, throughput
        );
        info!(
            "║ Requests Failed:   {:>8}  │  Failure Rate: {:>6.1}%        ║",
            failed_count, failure_rate
        );
        info!(
            "║ Labels Appended:   {:>8}                                  ║",
            self.labels_appended.load(Ordering::Relaxed)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Predicted Classes:                                           ║");
        for (class, count) in self.get_class_counts() {
            let pct = if ok_count > 0 {
                (count as f64 / ok_count as f64) * 100.0
            } else {
                0.0
            };
            info!("║   class {:>3}: {:>8} ({:>5.1}%)                              ║", class, count, pct);
        }

        let failures = self.get_failures_by_kind();
        if !failures.is_empty() {
            info!("║ Failures by Kind:                                            ║");
            for (kind, count) in &failures {
                info!("║   {:20}: {:>8}                             ║", kind, count);
            }
        }

        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Positive-Class Probability Distribution:                     ║");
        let score_dist = self.get_score_distribution();
        let scored: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if scored > 0 { (count as f64 / scored as f64) * 100.0 } else { 0.0 };
            let bar_len = (pct / 2.0) as usize;
            let bar: String = "█".repeat(bar_len.min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        let defaulted = self.get_defaulted_columns();
        if !defaulted.is_empty() {
            info!("Zero-filled columns (requests):");
            for (column, count) in defaulted.iter().take(10) {
                info!("  {}: {}", column, count);
            }
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = PipelineMetrics::new();

        metrics.record_prediction(
            Duration::from_micros(100),
            &PredictionResult::single(0, vec![0.8, 0.2]),
        );
        metrics.record_prediction(
            Duration::from_micros(200),
            &PredictionResult::single(1, vec![0.1, 0.9]),
        );
        metrics.record_failure(Duration::from_micros(50), "invalid_value");

        assert_eq!(metrics.requests_processed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.requests_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_class_counts().get(&1), Some(&1));
        assert_eq!(metrics.get_failures_by_kind().get("invalid_value"), Some(&1));

        let buckets = metrics.get_score_distribution();
        assert_eq!(buckets[2], 1);
        assert_eq!(buckets[9], 1);

        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.max_us, 200);
    }

    #[test]
    fn test_input_quality() {
        let metrics = PipelineMetrics::new();
        metrics.record_input_quality(1, &["weight_kg", "height_cm"]);
        metrics.record_input_quality(0, &["weight_kg"]);

        assert_eq!(metrics.labels_appended.load(Ordering::Relaxed), 1);
        assert_eq!(
            metrics.get_defaulted_columns(),
            vec![("weight_kg", 2), ("height_cm", 1)]
        );
    }

    #[test]
    fn test_empty_stats() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.get_processing_stats().count, 0);
        assert_eq!(metrics.get_score_distribution(), [0; 10]);
    }
}
