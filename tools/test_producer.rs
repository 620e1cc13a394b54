//! Test Request Producer
//!
//! Writes a synthetic payer/seller/history dataset as CSV, then sends scoring
//! requests for fresh transactions on those cards and terminals to NATS and
//! prints the replies.
//!
//! Usage: test_producer [data_dir] [nats_url] [subject] [batches] [batch_size] [fraud_rate]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
struct PayerRow {
    card_id: String,
    card_bin: String,
    card_first_transaction: String,
}

#[derive(Debug, Clone, Serialize)]
struct SellerRow {
    terminal_id: String,
    latitude: f64,
    longitude: f64,
    terminal_operation_start: String,
    terminal_soft_descriptor: String,
}

#[derive(Debug, Clone, Serialize)]
struct TransactionRow {
    transaction_id: String,
    card_id: String,
    terminal_id: String,
    tx_datetime: String,
    tx_amount: f64,
    is_fraud: u8,
    tx_fraud_report_date: String,
    is_transactional_fraud: u8,
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Synthetic data generator
struct DatasetGenerator {
    rng: rand::rngs::ThreadRng,
    payers: Vec<PayerRow>,
    sellers: Vec<SellerRow>,
    transaction_counter: u64,
    now: DateTime<Utc>,
}

impl DatasetGenerator {
    fn new(cards: usize, terminals: usize) -> Self {
        let mut rng = rand::thread_rng();
        let now = Utc::now();
        let bins = ["412345", "523456", "601100", "0042"];

        let payers = (0..cards)
            .map(|i| PayerRow {
                card_id: format!("card_{:06}", i),
                card_bin: bins[rng.gen_range(0..bins.len())].to_string(),
                card_first_transaction: format_time(now - ChronoDuration::days(rng.gen_range(30..1500))),
            })
            .collect();

        let sellers = (0..terminals)
            .map(|i| SellerRow {
                terminal_id: format!("term_{:05}", i),
                // Brazil, from the north coast down to the south-east
                latitude: rng.gen_range(-30.0..2.0),
                longitude: rng.gen_range(-60.0..-35.0),
                terminal_operation_start: format_time(now - ChronoDuration::days(rng.gen_range(60..3000))),
                terminal_soft_descriptor: format!("STORE {}", i),
            })
            .collect();

        Self {
            rng,
            payers,
            sellers,
            transaction_counter: 0,
            now,
        }
    }

    fn next_id(&mut self) -> String {
        self.transaction_counter += 1;
        format!("tx_{:012}", self.transaction_counter)
    }

    /// Labeled history spread over the last 60 days
    fn generate_history(&mut self, count: usize, fraud_rate: f64) -> Vec<TransactionRow> {
        let mut rows: Vec<TransactionRow> = (0..count)
            .map(|_| {
                let tx_datetime = self.now - ChronoDuration::seconds(self.rng.gen_range(3600..60 * 86_400));
                let is_fraud = self.rng.gen_bool(fraud_rate);
                let report = is_fraud.then(|| tx_datetime + ChronoDuration::days(self.rng.gen_range(0..20)));
                let card_id = self.payers.choose(&mut self.rng).map(|p| p.card_id.clone()).unwrap_or_default();
                let terminal_id = self.sellers.choose(&mut self.rng).map(|s| s.terminal_id.clone()).unwrap_or_default();

                TransactionRow {
                    transaction_id: self.next_id(),
                    card_id,
                    terminal_id,
                    tx_datetime: format_time(tx_datetime),
                    tx_amount: self.amount(is_fraud),
                    is_fraud: is_fraud as u8,
                    tx_fraud_report_date: report.map(format_time).unwrap_or_default(),
                    is_transactional_fraud: (is_fraud && self.rng.gen_bool(0.1)) as u8,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.tx_datetime.cmp(&b.tx_datetime));
        rows
    }

    /// Unlabeled transactions for a scoring request, within the last hour
    fn generate_request(&mut self, batch_size: usize, suspicious: bool) -> serde_json::Value {
        let transactions: Vec<serde_json::Value> = (0..batch_size)
            .map(|_| {
                let tx_datetime = self.now - ChronoDuration::seconds(self.rng.gen_range(0..3600));
                let card_id = self.payers.choose(&mut self.rng).map(|p| p.card_id.clone()).unwrap_or_default();
                let terminal_id = self.sellers.choose(&mut self.rng).map(|s| s.terminal_id.clone()).unwrap_or_default();
                json!({
                    "transaction_id": self.next_id(),
                    "card_id": card_id,
                    "terminal_id": terminal_id,
                    "tx_datetime": tx_datetime.to_rfc3339(),
                    "tx_amount": self.amount(suspicious),
                })
            })
            .collect();

        json!({
            "request_id": format!("req_{}", uuid::Uuid::new_v4()),
            "transactions": transactions,
        })
    }

    fn amount(&mut self, suspicious: bool) -> f64 {
        let amount: f64 = if suspicious {
            self.rng.gen_range(1000.0..10000.0)
        } else {
            self.rng.gen_range(10.0..500.0)
        };
        (amount * 100.0).round() / 100.0
    }
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Request Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let data_dir = args.get(1).map(|s| s.as_str()).unwrap_or("data");
    let nats_url = args.get(2).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(3).map(|s| s.as_str()).unwrap_or("fraud.score");
    let batches: u64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(10);
    let batch_size: usize = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(50);
    let fraud_rate: f64 = args.get(6).and_then(|s| s.parse().ok()).unwrap_or(0.1);

    info!(
        data_dir = %data_dir,
        nats_url = %nats_url,
        subject = %subject,
        batches = batches,
        batch_size = batch_size,
        fraud_rate = fraud_rate,
        "Configuration loaded"
    );

    let mut generator = DatasetGenerator::new(500, 100);
    let history = generator.generate_history(20_000, fraud_rate);

    let data_dir = Path::new(data_dir);
    std::fs::create_dir_all(data_dir)?;
    write_csv(&data_dir.join("payers.csv"), &generator.payers)?;
    write_csv(&data_dir.join("sellers.csv"), &generator.sellers)?;
    write_csv(&data_dir.join("transactions.csv"), &history)?;
    info!(
        payers = generator.payers.len(),
        sellers = generator.sellers.len(),
        history = history.len(),
        "Dataset written to {}",
        data_dir.display()
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(&mut generator, batches, batch_size, fraud_rate);
        }
    };

    let mut rng = rand::thread_rng();
    let mut declined = 0usize;
    let mut scored = 0usize;

    for i in 0..batches {
        let request = generator.generate_request(batch_size, rng.gen_bool(fraud_rate));
        let payload = serde_json::to_vec(&request)?;

        let reply = client.request(subject.to_string(), payload.into()).await?;
        let body: serde_json::Value = serde_json::from_slice(&reply.payload)?;

        match body.get("results").and_then(|r| r.as_array()) {
            Some(results) => {
                scored += results.len();
                declined += results
                    .iter()
                    .filter(|r| r.get("approved") == Some(&serde_json::Value::Bool(false)))
                    .count();
                info!(
                    "Batch {}/{}: {} results, {} declined so far",
                    i + 1,
                    batches,
                    results.len(),
                    declined
                );
            }
            None => warn!(batch = i + 1, reply = %body, "Request failed"),
        }
    }

    info!(
        "Completed! {} transactions scored in {} batches ({} declined)",
        scored, batches, declined
    );

    Ok(())
}

fn run_dry_mode(
    generator: &mut DatasetGenerator,
    batches: u64,
    batch_size: usize,
    fraud_rate: f64,
) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut rng = rand::thread_rng();
    for i in 0..batches {
        let request = generator.generate_request(batch_size, rng.gen_bool(fraud_rate));
        if i == 0 || (i + 1) % 10 == 0 {
            info!("Sample request {}:\n{}", i + 1, serde_json::to_string_pretty(&request)?);
        }
    }

    Ok(())
}
