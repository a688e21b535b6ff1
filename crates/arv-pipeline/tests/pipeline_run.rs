use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arv_adapters::{FixtureReviewSource, ReviewSource, SourceSpec};
use arv_core::AppTarget;
use arv_pipeline::{CancelFlag, PipelineConfig, PipelineError, ReviewPipeline, RunMode, TableStage};
use serde_json::json;
use tempfile::tempdir;

const EXPECTED_CSV: &str = "app,review_text,rating,date,source\n\
CBE,great app very easy to use,5,2024-04-30,Google Play\n\
CBE,app crashes on login since the update,1,2024-04-27,Google Play\n\
CBE,transfers are slow but ok,3,2024-04-26,Google Play\n\
BOA,keeps logging me out,2,2024-05-02,Google Play\n\
BOA,fingerprint login works well,4,2024-04-30,Google Play\n\
BOA,otp never arrives,1,2024-04-20,Google Play\n\
Dashen,best banking app in ethiopia,5,2024-03-10,Google Play\n\
Dashen,amole integration is smooth,4,2024-03-08,Google Play\n\
Dashen,needs dark mode,3,2024-03-07,Google Play\n";

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn sample_source() -> Arc<dyn ReviewSource> {
    let path = workspace_root().join("fixtures/reviews/sample.json");
    Arc::new(FixtureReviewSource::load(path).unwrap())
}

fn banks() -> Vec<AppTarget> {
    vec![
        AppTarget::new("CBE", "com.cbe.mobilebanking"),
        AppTarget::new("BOA", "com.boa.mobilebanking"),
        AppTarget::new("Dashen", "com.dashenbank.mobilebanking"),
    ]
}

fn config(dir: &Path, output: &str) -> PipelineConfig {
    PipelineConfig {
        output_path: Some(dir.join(output)),
        raw_output_path: Some(dir.join("raw_reviews.csv")),
        page_size: 2,
        page_delay_ms: 0,
        reports_dir: Some(dir.join("reports")),
        ..Default::default()
    }
}

#[test]
fn sample_fixture_and_registry_exist() {
    let root = workspace_root();
    assert!(root.join("fixtures/reviews/sample.json").exists());
    assert!(root.join("apps.yaml").exists());
}

#[tokio::test]
async fn run_writes_the_canonical_table_and_report() {
    let dir = tempdir().unwrap();
    let pipeline =
        ReviewPipeline::with_source(config(dir.path(), "reviews.csv"), banks(), sample_source(), CancelFlag::new())
            .unwrap();

    let summary = pipeline.run().await.unwrap();

    let written = std::fs::read_to_string(dir.path().join("reviews.csv")).unwrap();
    assert_eq!(written, EXPECTED_CSV);
    assert_eq!(summary.mode, RunMode::Run);
    assert_eq!(summary.final_stage, TableStage::Persisted);
    assert_eq!(summary.final_rows(), 9);
    assert!(summary.failed_apps().is_empty());

    let by_app = summary
        .apps
        .iter()
        .map(|a| (a.app.as_str(), (a.collected, a.duplicates, a.dropped_missing, a.final_rows)))
        .collect::<BTreeMap<_, _>>();
    assert_eq!(by_app["CBE"], (5, 1, 1, 3));
    assert_eq!(by_app["BOA"], (4, 0, 1, 3));
    assert_eq!(by_app["Dashen"], (4, 1, 0, 3));

    let report_dir = PathBuf::from(summary.report_dir.clone().unwrap());
    assert!(report_dir.join("run_summary.json").exists());
    let md = std::fs::read_to_string(report_dir.join("summary.md")).unwrap();
    assert!(md.contains("| CBE | 5 | 0 | 1 | 1 | 3 | ok |"));
}

#[tokio::test]
async fn reviews_per_app_caps_each_app() {
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path(), "reviews.csv");
    cfg.reviews_per_app = 2;
    let pipeline = ReviewPipeline::with_source(cfg, banks(), sample_source(), CancelFlag::new()).unwrap();

    let summary = pipeline.run().await.unwrap();
    assert!(summary.apps.iter().all(|a| a.collected == 2));
}

#[tokio::test]
async fn a_failing_app_does_not_sink_the_run() {
    let dir = tempdir().unwrap();
    let mut apps = banks();
    apps.insert(1, AppTarget::new("Abyssinia", "com.boa.abyssinia.missing"));
    let pipeline =
        ReviewPipeline::with_source(config(dir.path(), "reviews.csv"), apps, sample_source(), CancelFlag::new())
            .unwrap();

    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.apps[1].app, "Abyssinia");
    assert!(summary.apps[1].error.is_some());
    assert_eq!(summary.failed_apps().len(), 1);
    let written = std::fs::read_to_string(dir.path().join("reviews.csv")).unwrap();
    assert_eq!(written, EXPECTED_CSV);
}

#[tokio::test]
async fn invalid_dates_abort_before_anything_is_written() {
    let dir = tempdir().unwrap();
    let source = FixtureReviewSource::from_records(BTreeMap::from([(
        "com.cbe.mobilebanking".to_string(),
        vec![
            json!({"content": "fine", "score": 5, "at": "2024-01-01"}),
            json!({"content": "when?", "score": 4, "at": "not a date"}),
            json!({"content": "no date", "score": 4}),
        ],
    )]));
    let pipeline = ReviewPipeline::with_source(
        config(dir.path(), "reviews.csv"),
        vec![AppTarget::new("CBE", "com.cbe.mobilebanking")],
        Arc::new(source),
        CancelFlag::new(),
    )
    .unwrap();

    let err = pipeline.run().await.unwrap_err();
    match err {
        PipelineError::Validation(v) => {
            assert_eq!(v.rows.len(), 2);
            assert_eq!(v.rows[0].raw_date.as_deref(), Some("not a date"));
            assert_eq!(v.rows[1].raw_date, None);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(!dir.path().join("reviews.csv").exists());
    assert!(!dir.path().join("reports").exists());
}

#[tokio::test]
async fn cancelled_runs_persist_nothing() {
    let dir = tempdir().unwrap();
    let cancel = CancelFlag::new();
    cancel.cancel();
    let pipeline =
        ReviewPipeline::with_source(config(dir.path(), "reviews.csv"), banks(), sample_source(), cancel).unwrap();

    assert!(matches!(pipeline.run().await, Err(PipelineError::Cancelled)));
    assert!(!dir.path().join("reviews.csv").exists());
}

#[tokio::test]
async fn run_requires_an_output_path() {
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path(), "reviews.csv");
    cfg.output_path = None;
    let pipeline = ReviewPipeline::with_source(cfg, banks(), sample_source(), CancelFlag::new()).unwrap();
    assert!(matches!(pipeline.run().await, Err(PipelineError::Configuration(_))));
}

#[tokio::test]
async fn empty_app_set_is_rejected() {
    let dir = tempdir().unwrap();
    let result =
        ReviewPipeline::with_source(config(dir.path(), "reviews.csv"), Vec::new(), sample_source(), CancelFlag::new());
    assert!(matches!(result, Err(PipelineError::Configuration(_))));
}

#[tokio::test]
async fn collect_then_clean_matches_a_full_run() {
    let dir = tempdir().unwrap();
    let pipeline =
        ReviewPipeline::with_source(config(dir.path(), "reviews.csv"), banks(), sample_source(), CancelFlag::new())
            .unwrap();

    let collected = pipeline.collect().await.unwrap();
    assert_eq!(collected.mode, RunMode::Collect);
    assert_eq!(collected.final_stage, TableStage::Raw);
    assert_eq!(collected.output.as_ref().unwrap().rows, 13);

    let cleaned = pipeline.clean_file(dir.path().join("raw_reviews.csv")).await.unwrap();
    assert_eq!(cleaned.mode, RunMode::Clean);
    assert_eq!(cleaned.rejected_rows, 0);
    let written = std::fs::read_to_string(dir.path().join("reviews.csv")).unwrap();
    assert_eq!(written, EXPECTED_CSV);
}

#[tokio::test]
async fn clean_accepts_legacy_exports_and_skips_untracked_apps() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("legacy.csv");
    std::fs::write(
        &input,
        "app_name,content,score,at\n\
         CBE,Works great!,5,2023-01-01 10:00:00\n\
         Telebirr,Not tracked,4,2023-01-02\n\
         ,No app,3,2023-01-03\n\
         Dashen,Needs dark mode,3,2023-01-04\n",
    )
    .unwrap();
    let pipeline =
        ReviewPipeline::with_source(config(dir.path(), "clean.csv"), banks(), sample_source(), CancelFlag::new())
            .unwrap();

    let summary = pipeline.clean_file(&input).await.unwrap();

    assert_eq!(summary.rejected_rows, 2);
    let written = std::fs::read_to_string(dir.path().join("clean.csv")).unwrap();
    assert_eq!(
        written,
        "app,review_text,rating,date,source\n\
         CBE,works great,5,2023-01-01,Google Play\n\
         Dashen,needs dark mode,3,2023-01-04,Google Play\n"
    );
}

#[tokio::test]
async fn parquet_output_is_chosen_by_extension() {
    let dir = tempdir().unwrap();
    let pipeline = ReviewPipeline::with_source(
        config(dir.path(), "reviews.parquet"),
        banks(),
        sample_source(),
        CancelFlag::new(),
    )
    .unwrap();

    let summary = pipeline.run().await.unwrap();
    let output = summary.output.unwrap();
    assert_eq!(output.format, "parquet");
    assert_eq!(output.rows, 9);
    let bytes = std::fs::read(dir.path().join("reviews.parquet")).unwrap();
    assert_eq!(&bytes[..4], b"PAR1");
}

fn write_registry(dir: &Path) -> PathBuf {
    let path = dir.join("apps.yaml");
    std::fs::write(
        &path,
        "apps:\n  - label: CBE\n    package_id: com.cbe.mobilebanking\n  - label: Dashen\n    package_id: com.dashenbank.mobilebanking\n",
    )
    .unwrap();
    path
}

#[tokio::test]
async fn offline_clean_ignores_a_stale_fixture_path() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("raw_reviews.csv");
    std::fs::write(&input, "app,review_text,rating,date\nCBE,Works great!,5,2023-01-01\n").unwrap();
    let mut cfg = config(dir.path(), "clean.csv");
    cfg.apps_file = write_registry(dir.path());
    cfg.source = SourceSpec::Fixture {
        path: dir.path().join("gone/sample.json"),
    };

    let pipeline = ReviewPipeline::offline(cfg).unwrap();
    let summary = pipeline.clean_file(&input).await.unwrap();

    assert_eq!(summary.final_rows(), 1);
    assert!(matches!(
        pipeline.collect().await,
        Err(PipelineError::Configuration(_))
    ));
}

#[tokio::test]
async fn missing_raw_table_is_an_error() {
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path(), "clean.csv");
    cfg.apps_file = write_registry(dir.path());
    let pipeline = ReviewPipeline::offline(cfg).unwrap();

    let err = pipeline.clean_file(dir.path().join("nope.csv")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Other(_)));
    assert!(!dir.path().join("clean.csv").exists());
}
