//! Pipeline tests against the artifacts shipped in `artifacts/`.

use overdose_risk_pipeline::pipeline::{PipelineOptions, RiskPipeline};
use overdose_risk_pipeline::{
    ArtifactLoader, PatientRecord, PredictionRequest, FEATURE_COUNT, FEATURE_NAMES,
};
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;

fn artifacts_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("artifacts")
}

fn pipeline() -> RiskPipeline {
    let artifacts = ArtifactLoader::new(artifacts_dir()).load().unwrap();
    RiskPipeline::new(artifacts, PipelineOptions::default())
}

fn example_record() -> PatientRecord {
    serde_json::from_value(json!({
        "age": 45, "weight": 80, "height": 175, "gender": "female",
        "medicalHistory": [], "currentMedications": [],
        "has_chronic_pain": true, "has_mental_health_dx": false,
        "history_of_substance_abuse": false, "liver_disease": false,
        "kidney_disease": false, "respiratory_disease": false,
        "treatment_duration_months": 6, "concurrent_benzos": false,
        "concurrent_muscle_relaxants": false, "concurrent_sleep_meds": false,
        "concurrent_antidepressants": false, "tobacco_use": false,
        "previous_overdose": false, "alcohol_use": "none",
        "primary_opioid": "oxycodone", "daily_dosage_mg": 30,
        "daily_mme": 45.0, "risk_factors_count": 2
    }))
    .unwrap()
}

#[test]
fn test_example_record_scores() {
    let result = pipeline().predict(example_record()).unwrap();

    assert_eq!(result.prediction.len(), 1);
    assert_eq!(result.risk_probability.len(), 1);
    let row = &result.risk_probability[0];
    assert_eq!(row.len(), 2);
    assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn test_example_record_from_payload() {
    let payload = serde_json::to_vec(&json!({
        "request_id": "req-1",
        "patient": example_record()
    }))
    .unwrap();
    let request = PredictionRequest::from_payload(&payload).unwrap();
    assert_eq!(request.request_id, "req-1");

    let from_payload = pipeline().predict(request.patient).unwrap();
    let direct = pipeline().predict(example_record()).unwrap();
    assert_eq!(from_payload, direct);
}

#[test]
fn test_deterministic() {
    let pipeline = pipeline();
    let first = pipeline.predict(example_record()).unwrap();
    let second = pipeline.predict(example_record()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_zero_fill_matches_explicit_zero() {
    let pipeline = pipeline();

    // weight/height are not schema columns, so weight_kg/height_cm are zero-filled
    let defaulted = pipeline.predict_detailed(example_record()).unwrap();
    assert!(defaulted.defaulted.contains(&"weight_kg"));
    assert!(defaulted.defaulted.contains(&"height_cm"));

    let explicit = example_record().with("weight_kg", 0).with("height_cm", 0);
    let explicit = pipeline.predict_detailed(explicit).unwrap();

    assert!(explicit.defaulted.is_empty());
    assert_eq!(explicit.features, defaulted.features);
    assert_eq!(explicit.result, defaulted.result);

    let measured = example_record().with("weight_kg", 80).with("height_cm", 175);
    let measured = pipeline.predict_detailed(measured).unwrap();
    assert_ne!(measured.features, defaulted.features);
}

#[test]
fn test_string_flags_match_native_booleans() {
    let pipeline = pipeline();
    let strings = example_record()
        .with("has_chronic_pain", "YES")
        .with("tobacco_use", "no")
        .with("previous_overdose", "f");

    let native = pipeline.predict_detailed(example_record()).unwrap();
    let coerced = pipeline.predict_detailed(strings).unwrap();
    assert_eq!(coerced.features, native.features);
}

#[test]
fn test_fixed_vector_shape() {
    let pipeline = pipeline();
    let sparse = PatientRecord::new().with("age", 30);

    for record in [example_record(), sparse, PatientRecord::new()] {
        let output = pipeline.predict_detailed(record).unwrap();
        assert_eq!(output.features.len(), FEATURE_COUNT);
        let names: Vec<&str> = output.features.named().map(|(name, _)| name).collect();
        assert_eq!(names, FEATURE_NAMES);
    }
}

#[test]
fn test_supplied_codes_do_not_bypass_encoders() {
    let pipeline = pipeline();
    let record = PatientRecord::new()
        .with("age", 40)
        .with("gender_encoded", 99)
        .with("alcohol_use_encoded", -5);

    let output = pipeline.predict_detailed(record).unwrap();
    assert_eq!(output.features.get("gender_encoded"), Some(0.0));
    assert_eq!(output.features.get("alcohol_use_encoded"), Some(0.0));
    assert!(output.defaulted.contains(&"gender_encoded"));

    let overridden = example_record().with("gender_encoded", 99);
    let output = pipeline.predict_detailed(overridden).unwrap();
    assert_eq!(output.features.get("gender_encoded"), Some(0.0));
}

#[test]
fn test_overflowing_values_fail_instead_of_scoring() {
    let record = example_record()
        .with("has_chronic_pain", 1.7e308)
        .with("tobacco_use", 1.7e308);

    let err = pipeline().predict(record).unwrap_err();
    assert_eq!(err.kind(), "invalid_value");
}

#[test]
fn test_concurrent_unseen_labels() {
    let pipeline = pipeline();
    let labels = ["tapentadol", "methadone"];

    let outputs: Vec<(usize, f64)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let pipeline = &pipeline;
                scope.spawn(move || {
                    let label = i % labels.len();
                    let record = example_record().with("primary_opioid", labels[label]);
                    let output = pipeline.predict_detailed(record).unwrap();
                    (label, output.features.get("primary_opioid_encoded").unwrap())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let encoder = pipeline.encoders().unwrap().get("primary_opioid").unwrap();
    assert_eq!(encoder.len().unwrap(), 8);

    let mut indices = HashSet::new();
    for (label, index) in &outputs {
        let expected = encoder.lookup(labels[*label]).unwrap().unwrap() as f64;
        assert_eq!(*index, expected);
        indices.insert(index.to_bits());
    }
    assert_eq!(indices.len(), 2);
}

#[test]
fn test_missing_artifacts_fail_every_call() {
    let loader = ArtifactLoader::new(artifacts_dir().join("does-not-exist"));
    for _ in 0..3 {
        let err = loader.load().unwrap_err();
        assert_eq!(err.kind(), "artifact_missing");
    }

    let per_request = RiskPipeline::per_request(loader, PipelineOptions::default());
    for _ in 0..3 {
        let err = per_request.predict(example_record()).unwrap_err();
        assert_eq!(err.kind(), "artifact_missing");
    }
}
