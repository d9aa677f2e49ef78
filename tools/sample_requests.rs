//! Sample Request Producer
//!
//! Generates patient records and sends them to the risk pipeline over NATS,
//! logging each response. Falls back to printing records when NATS is down.

use overdose_risk_pipeline::{PatientRecord, PredictionRequest, PredictionResponse};
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const GENDERS: &[&str] = &["female", "male", "other"];
const ALCOHOL_USE: &[&str] = &["none", "moderate", "heavy"];
const OPIOIDS: &[&str] = &[
    "oxycodone",
    "hydrocodone",
    "morphine",
    "fentanyl",
    "tramadol",
    "codeine",
];
/// Labels the fitted encoders have never seen
const UNSEEN_OPIOIDS: &[&str] = &["tapentadol", "buprenorphine", "methadone"];
const FLAG_SPELLINGS: &[&str] = &["yes", "no", "true", "false", "1", "0", "Y", "N"];

/// Patient record generator for exercising the pipeline
struct PatientGenerator {
    rng: rand::rngs::ThreadRng,
    request_counter: u64,
}

impl PatientGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            request_counter: 0,
        }
    }

    fn next_request(&mut self, unseen_rate: f64) -> PredictionRequest {
        self.request_counter += 1;

        let record = if self.rng.gen_bool(unseen_rate) {
            self.generate_unusual()
        } else {
            self.generate_typical()
        };

        let mut request = PredictionRequest::new(record);
        request.request_id = format!("req_{:012}", self.request_counter);
        request
    }

    /// Well-formed record with native booleans and known labels
    fn generate_typical(&mut self) -> PatientRecord {
        let dosage: f64 = self.rng.gen_range(5.0..120.0);
        serde_json::from_value(json!({
            "age": self.rng.gen_range(18..90),
            "weight_kg": self.rng.gen_range(45.0..130.0),
            "height_cm": self.rng.gen_range(150.0..200.0),
            "gender": self.random_choice(GENDERS),
            "alcohol_use": self.random_choice(ALCOHOL_USE),
            "primary_opioid": self.random_choice(OPIOIDS),
            "has_chronic_pain": self.rng.gen_bool(0.6),
            "has_mental_health_dx": self.rng.gen_bool(0.3),
            "history_of_substance_abuse": self.rng.gen_bool(0.15),
            "liver_disease": self.rng.gen_bool(0.05),
            "kidney_disease": self.rng.gen_bool(0.05),
            "respiratory_disease": self.rng.gen_bool(0.1),
            "concurrent_benzos": self.rng.gen_bool(0.1),
            "concurrent_muscle_relaxants": self.rng.gen_bool(0.1),
            "concurrent_sleep_meds": self.rng.gen_bool(0.1),
            "concurrent_antidepressants": self.rng.gen_bool(0.2),
            "tobacco_use": self.rng.gen_bool(0.25),
            "previous_overdose": self.rng.gen_bool(0.05),
            "daily_dosage_mg": dosage,
            "daily_mme": dosage * self.rng.gen_range(1.0..1.5),
            "treatment_duration_months": self.rng.gen_range(1..60),
            "risk_factors_count": self.rng.gen_range(0..6),
        }))
        .unwrap_or_default()
    }

    /// Sparse record with string flags, unseen labels and raw body measurements
    fn generate_unusual(&mut self) -> PatientRecord {
        let mut record = PatientRecord::new()
            .with("age", self.rng.gen_range(18..90).to_string())
            .with("weight", self.rng.gen_range(45..130))
            .with("height", self.rng.gen_range(150..200))
            .with("gender", self.random_choice(GENDERS))
            .with("primary_opioid", self.random_choice(UNSEEN_OPIOIDS))
            .with("daily_mme", self.rng.gen_range(20.0..200.0));

        for field in ["has_chronic_pain", "tobacco_use", "previous_overdose", "concurrent_benzos"] {
            let flag = self.random_choice(FLAG_SPELLINGS);
            record.insert(field, flag);
        }
        record
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

/// Parse a probability argument, clamped to `[0, 1]`
fn parse_rate(arg: Option<&str>, default: f64) -> f64 {
    arg.and_then(|s| s.parse::<f64>().ok())
        .filter(|r| r.is_finite())
        .map_or(default, |r| r.clamp(0.0, 1.0))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sample_requests=info".parse()?),
        )
        .init();

    info!("Starting Sample Request Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("risk.requests");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let unseen_rate = parse_rate(args.get(4).map(String::as_str), 0.1);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        unseen_rate = unseen_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, unseen_rate, delay_ms).await;
        }
    };

    let mut generator = PatientGenerator::new();
    let mut succeeded = 0u64;
    let mut failed = 0u64;

    info!("Sending {} prediction requests...", count);

    for i in 0..count {
        let request = generator.next_request(unseen_rate);
        let payload = serde_json::to_vec(&request)?;

        let reply = match client.request(subject.to_string(), payload.into()).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "Request failed");
                failed += 1;
                continue;
            }
        };

        match serde_json::from_slice::<PredictionResponse>(&reply.payload) {
            Ok(response) if response.is_success() => {
                succeeded += 1;
                let result = response.prediction.as_ref();
                info!(
                    request_id = %response.request_id,
                    prediction = ?result.and_then(|r| r.predicted_class()),
                    risk = ?result.and_then(|r| r.positive_probability()),
                    processing_time_us = response.processing_time_us,
                    "Prediction received"
                );
            }
            Ok(response) => {
                failed += 1;
                warn!(
                    request_id = %response.request_id,
                    kind = ?response.error_kind,
                    detail = ?response.detail,
                    "Error response received"
                );
            }
            Err(e) => {
                failed += 1;
                warn!(error = %e, "Unreadable response");
            }
        }

        if (i + 1) % 10 == 0 {
            info!(
                "Sent {}/{} requests ({} succeeded, {} failed)",
                i + 1,
                count,
                succeeded,
                failed
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Sent {} requests ({} succeeded, {} failed)",
        count, succeeded, failed
    );

    Ok(())
}

async fn run_dry_mode(count: u64, unseen_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = PatientGenerator::new();

    for i in 0..count {
        let request = generator.next_request(unseen_rate);
        let json = serde_json::to_string_pretty(&request)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample request {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate(None, 0.1), 0.1);
        assert_eq!(parse_rate(Some("0.25"), 0.1), 0.25);
        assert_eq!(parse_rate(Some("1.5"), 0.1), 1.0);
        assert_eq!(parse_rate(Some("-2"), 0.1), 0.0);
        assert_eq!(parse_rate(Some("NaN"), 0.1), 0.1);
        assert_eq!(parse_rate(Some("lots"), 0.1), 0.1);
    }

    #[test]
    fn test_generator_accepts_boundary_rates() {
        let mut generator = PatientGenerator::new();
        for rate in [0.0, 1.0] {
            let request = generator.next_request(rate);
            assert!(!request.patient.is_empty());
        }
    }
}
