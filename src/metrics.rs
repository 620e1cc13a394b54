//! Performance metrics and statistics tracking for the fraud feature pipeline.

use crate::assembler::FillReport;
use crate::join::JoinDiagnostics;
use crate::types::ScoredTransaction;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Scoring batches completed
    pub batches_processed: AtomicU64,
    /// Scoring batches rejected or failed as a whole
    pub batches_failed: AtomicU64,
    /// Transactions that received a result
    pub transactions_scored: AtomicU64,
    /// Transactions declined (probability at or above threshold)
    pub declines: AtomicU64,
    /// Rows the classifier could not score
    pub rows_failed: AtomicU64,
    /// Batch rows without payer record
    pub missing_payers: AtomicU64,
    /// Batch rows without seller record
    pub missing_sellers: AtomicU64,
    /// Feature cells filled because the value was absent
    pub cells_absent: AtomicU64,
    /// Feature cells filled because the value was not finite
    pub cells_non_finite: AtomicU64,
    /// Prediction logs dropped on a full queue
    pub logs_dropped: AtomicU64,
    /// Batch processing times
    batch_times: RwLock<LatencyWindow>,
    /// Per-model inference times
    model_times: RwLock<HashMap<String, LatencyWindow>>,
    /// Fraud probability histogram, tenths of [0, 1]
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
    /// 1 - std dev of the per-model scores of each ensemble row
    model_agreements: RwLock<Vec<f64>>,
}

/// Most recent latency samples, in microseconds
#[derive(Debug, Clone)]
struct LatencyWindow {
    samples: Vec<u64>,
    capacity: usize,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Once full, the older half is discarded
    fn push(&mut self, duration: Duration) {
        self.samples.push(duration.as_micros() as u64);
        if self.samples.len() > self.capacity {
            self.samples.drain(0..self.capacity / 2);
        }
    }

    fn summary(&self) -> ProcessingStats {
        if self.samples.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let count = sorted.len();
        let percentile = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: percentile(0.5),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            batches_processed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            transactions_scored: AtomicU64::new(0),
            declines: AtomicU64::new(0),
            rows_failed: AtomicU64::new(0),
            missing_payers: AtomicU64::new(0),
            missing_sellers: AtomicU64::new(0),
            cells_absent: AtomicU64::new(0),
            cells_non_finite: AtomicU64::new(0),
            logs_dropped: AtomicU64::new(0),
            batch_times: RwLock::new(LatencyWindow::new(10_000)),
            model_times: RwLock::new(HashMap::new()),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
            model_agreements: RwLock::new(Vec::with_capacity(1000)),
        }
    }

    /// Record a completed batch and its results
    pub fn record_batch(&self, processing_time: Duration, results: &[ScoredTransaction]) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.transactions_scored
            .fetch_add(results.len() as u64, Ordering::Relaxed);

        self.batch_times
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(processing_time);

        let mut buckets = self.score_buckets.write().unwrap_or_else(PoisonError::into_inner);
        for result in results {
            if !result.approved {
                self.declines.fetch_add(1, Ordering::Relaxed);
            }
            match result.fraud_probability {
                Some(p) => buckets[((p * 10.0) as usize).min(9)] += 1,
                None => {
                    self.rows_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn record_batch_failure(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record reference rows the join could not find
    pub fn record_join(&self, diagnostics: &JoinDiagnostics) {
        self.missing_payers
            .fetch_add(diagnostics.missing_payers as u64, Ordering::Relaxed);
        self.missing_sellers
            .fetch_add(diagnostics.missing_sellers as u64, Ordering::Relaxed);
    }

    /// Record cells filled by the default policy
    pub fn record_fills(&self, fills: &FillReport) {
        self.cells_absent.fetch_add(fills.absent as u64, Ordering::Relaxed);
        self.cells_non_finite
            .fetch_add(fills.non_finite as u64, Ordering::Relaxed);
    }

    pub fn record_dropped_log(&self) {
        self.logs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record model inference time
    pub fn record_model_time(&self, model_name: &str, duration: Duration) {
        self.model_times
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(model_name.to_string())
            .or_insert_with(|| LatencyWindow::new(1000))
            .push(duration);
    }

    /// Record model agreement (std dev of scores)
    pub fn record_model_agreement(&self, model_scores: &HashMap<String, f64>) {
        if model_scores.len() < 2 {
            return;
        }

        let scores: Vec<f64> = model_scores.values().copied().collect();
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;

        // Agreement = 1 - std_dev (higher = more agreement)
        let agreement = 1.0 - variance.sqrt().min(1.0);

        let mut agreements = self.model_agreements.write().unwrap_or_else(PoisonError::into_inner);
        agreements.push(agreement);
        if agreements.len() > 1000 {
            agreements.drain(0..500);
        }
    }

    /// Batch processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        self.batch_times
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .summary()
    }

    /// Inference time statistics per model
    pub fn get_model_stats(&self) -> HashMap<String, ProcessingStats> {
        self.model_times
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(model, window)| (model.clone(), window.summary()))
            .collect()
    }

    /// Get average model agreement
    pub fn get_avg_agreement(&self) -> f64 {
        let agreements = self.model_agreements.read().unwrap_or_else(PoisonError::into_inner);
        if agreements.is_empty() {
            return 0.0;
        }
        agreements.iter().sum::<f64>() / agreements.len() as f64
    }

    /// Get current throughput (transactions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get score distribution
    pub fn get_score_distribution(&self) -> [u64; 10] {
        *self.score_buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let tx_count = self.transactions_scored.load(Ordering::Relaxed);
        let declines = self.declines.load(Ordering::Relaxed);
        let decline_rate = if tx_count > 0 {
            (declines as f64 / tx_count as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();
        let agreement = self.get_avg_agreement();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║          FRAUD FEATURE PIPELINE - METRICS SUMMARY            ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Batches: {:>8} ok {:>6} failed  │  Throughput: {:>6.1} tx/s ║",
            self.batches_processed.load(Ordering::Relaxed),
            self.batches_failed.load(Ordering::Relaxed),
            throughput
        );
        info!(
            "║ Transactions Scored:    {:>8}  │  Decline Rate: {:>6.1}%   ║",
            tx_count, decline_rate
        );
        info!(
            "║ Rows Failed: {:>6}  Logs Dropped: {:>6}                     ║",
            self.rows_failed.load(Ordering::Relaxed),
            self.logs_dropped.load(Ordering::Relaxed)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Batch Time (μs): mean={:>6} p50={:>6} p95={:>6} p99={:>6}   ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!(
            "║ Model Agreement: {:>5.1}% (higher = models agree more)        ║",
            agreement * 100.0
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Missing payers: {:>6}  sellers: {:>6}                        ║",
            self.missing_payers.load(Ordering::Relaxed),
            self.missing_sellers.load(Ordering::Relaxed)
        );
        info!(
            "║ Defaulted cells: absent={:>8} non-finite={:>8}            ║",
            self.cells_absent.load(Ordering::Relaxed),
            self.cells_non_finite.load(Ordering::Relaxed)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Fraud Probability Distribution:                              ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
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

        let model_stats = self.get_model_stats();
        if !model_stats.is_empty() {
            info!("Model Inference Times (μs):");
            for (model, stats) in &model_stats {
                info!(
                    "  {}: mean={} p50={} p99={} (calls={})",
                    model, stats.mean_us, stats.p50_us, stats.p99_us, stats.count
                );
            }
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency summary over the retained samples
#[derive(Debug, Default, Clone, PartialEq, Eq)]
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
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
