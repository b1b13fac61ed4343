mod common;

use std::path::Path;

use serde_json::{Value as Json, json};

use common::{ScriptedReporter, cycler_csv, cycler_mapping, write_file};
use instrument_harvester::HarvestError;
use instrument_harvester::config::{HarvestOptions, MonitoredPath};
use instrument_harvester::convert::parquet::read_partition;
use instrument_harvester::detect::FormatRegistry;
use instrument_harvester::harvest::{
    HarvestOutcome, HarvestState, HarvestStateMachine, HarvestStatus, TracingObserver,
};
use instrument_harvester::types::Value;

fn options(scratch: &Path) -> HarvestOptions {
    HarvestOptions {
        scratch_root: Some(scratch.to_path_buf()),
        ..HarvestOptions::default()
    }
}

fn harvest(
    file: &Path,
    monitored: &MonitoredPath,
    reporter: &ScriptedReporter,
    opts: &HarvestOptions,
) -> Result<HarvestOutcome, HarvestError> {
    let capability = FormatRegistry::builtin().dispatch(file)?;
    HarvestStateMachine::new(file, capability, monitored, reporter, &TracingObserver, opts).run()
}

fn scratch_is_empty(scratch: &Path) -> bool {
    std::fs::read_dir(scratch).map(|mut d| d.next().is_none()).unwrap_or(true)
}

#[test]
fn small_file_is_harvested_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let kept = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "cell.csv", cycler_csv(39));
    let monitored = MonitoredPath::new("p1", dir.path());
    let mut reporter = ScriptedReporter::new(Some(cycler_mapping()));
    reporter.keep_dir = Some(kept.path().to_path_buf());
    let scratch = dir.path().join("scratch");

    let outcome = harvest(&file, &monitored, &reporter, &options(&scratch)).unwrap();

    assert_eq!(outcome.status, HarvestStatus::Complete);
    assert_eq!(outcome.state, HarvestState::Complete);
    assert_eq!(outcome.total_rows, 39);
    assert_eq!(outcome.partition_count, 1);
    assert_eq!(outcome.successes(), 1);
    assert!(outcome.errors().is_empty());
    assert!(outcome.plot_uploaded);

    assert_eq!(
        reporter.stages(),
        vec!["file metadata", "data summary", "upload complete", "harvest complete"]
    );
    let complete = reporter.report_with_stage("upload complete").unwrap();
    assert_eq!(complete["content"]["data"], json!({"successes": 1, "errors": {}}));

    let uploads = reporter.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].part, "parquet_file");
    assert_eq!(uploads[0].fields.filename, "cell.part_0.parquet");
    assert_eq!(uploads[0].fields.total_row_count, Some(39));
    assert_eq!(uploads[1].part, "png_file");
    assert_eq!(uploads[1].fields.stage, "upload png");

    let partition = read_partition(&kept.path().join("cell.part_0.parquet")).unwrap();
    assert_eq!(partition.data.row_count(), 39);
    assert_eq!(partition.producer_version(), Some(env!("CARGO_PKG_VERSION")));
    let names: Vec<&str> = partition.data.schema.field_names().collect();
    assert_eq!(names, vec!["ElapsedTime_s", "Voltage_V", "Current_A"]);
    assert_eq!(partition.data.rows[38][0], Value::Float64(38.0));
    match partition.data.rows[0][2] {
        Value::Float64(v) => assert!((v - 0.0005).abs() < 1e-12),
        ref other => panic!("unexpected current value {other:?}"),
    }

    assert!(scratch_is_empty(&scratch));
}

#[test]
fn metadata_and_summary_reports_have_wire_shape() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "cell.csv", cycler_csv(25));
    let monitored = MonitoredPath::new("p1", dir.path());
    let reporter = ScriptedReporter::new(Some(cycler_mapping()));

    harvest(&file, &monitored, &reporter, &options(&dir.path().join("scratch"))).unwrap();

    let metadata = reporter.report_with_stage("file metadata").unwrap();
    assert_eq!(metadata["status"], "success");
    assert_eq!(metadata["monitored_path_id"], "p1");
    assert_eq!(metadata["content"]["task"], "import");
    let data = &metadata["content"]["data"];
    assert_eq!(data["parser"], "Delimited");
    assert_eq!(data["core_metadata"], json!({"preamble": null}));
    assert_eq!(data["extra_metadata"]["voltage"], json!({"has_data": true}));
    assert_eq!(data["test_date"], Json::Null);

    // The summary travels as a JSON document encoded in a string.
    let summary = reporter.report_with_stage("data summary").unwrap();
    let encoded = summary["content"]["data"].as_str().unwrap();
    let table: Json = serde_json::from_str(encoded).unwrap();
    assert_eq!(table["time"]["0"], "0");
    assert_eq!(table["time"]["9"], "9");
    assert!(table["time"].get("10").is_none());
    assert_eq!(table.as_object().unwrap().len(), 3);
}

#[test]
fn preamble_is_reported_and_excluded_from_data() {
    let dir = tempfile::tempdir().unwrap();
    let kept = tempfile::tempdir().unwrap();
    let preamble = "Instrument: cycler 7\nOperator: someone\n\n";
    let file = write_file(dir.path(), "run.txt", format!("{preamble}{}", cycler_csv(30)));
    let monitored = MonitoredPath::new("p1", dir.path());
    let mut reporter = ScriptedReporter::new(Some(cycler_mapping()));
    reporter.keep_dir = Some(kept.path().to_path_buf());

    let outcome = harvest(&file, &monitored, &reporter, &options(&dir.path().join("scratch"))).unwrap();

    assert_eq!(outcome.total_rows, 30);
    let metadata = reporter.report_with_stage("file metadata").unwrap();
    assert_eq!(
        metadata["content"]["data"]["core_metadata"]["preamble"],
        json!(preamble)
    );
    let partition = read_partition(&kept.path().join("run.part_0.parquet")).unwrap();
    assert_eq!(partition.data.rows[0][0], Value::Float64(0.0));
}

#[test]
fn rows_are_split_into_ordered_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let kept = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "cell.csv", cycler_csv(250));
    let mut monitored = MonitoredPath::new("p1", dir.path());
    monitored.max_partition_line_count = Some(100);
    let mut reporter = ScriptedReporter::new(Some(cycler_mapping()));
    reporter.keep_dir = Some(kept.path().to_path_buf());

    let outcome = harvest(&file, &monitored, &reporter, &options(&dir.path().join("scratch"))).unwrap();

    assert_eq!(outcome.partition_count, 3);
    let uploads = reporter.uploads.lock().unwrap().clone();
    let numbers: Vec<_> = uploads.iter().filter_map(|u| u.fields.partition_number).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
    assert!(uploads.iter().take(3).all(|u| u.fields.partition_count == Some(3)));

    let sizes: Vec<usize> = (0..3)
        .map(|i| {
            read_partition(&kept.path().join(format!("cell.part_{i}.parquet")))
                .unwrap()
                .data
                .row_count()
        })
        .collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    let last = read_partition(&kept.path().join("cell.part_2.parquet")).unwrap();
    assert_eq!(last.data.rows[0][0], Value::Float64(200.0));
}

#[test]
fn missing_mapping_completes_without_converting() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "cell.csv", cycler_csv(40));
    let monitored = MonitoredPath::new("p1", dir.path());
    let reporter = ScriptedReporter::new(None);

    let outcome = harvest(&file, &monitored, &reporter, &options(&dir.path().join("scratch"))).unwrap();

    assert_eq!(outcome.status, HarvestStatus::AwaitingMapping);
    assert_eq!(outcome.state, HarvestState::SummaryReported);
    assert_eq!(
        reporter.stages(),
        vec!["file metadata", "data summary", "harvest complete"]
    );
    assert_eq!(reporter.tasks().last().map(String::as_str), Some("import"));
    assert!(reporter.uploads.lock().unwrap().is_empty());
}

#[test]
fn some_failed_partitions_are_listed_in_completion_report() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "cell.csv", cycler_csv(30));
    let mut monitored = MonitoredPath::new("p1", dir.path());
    monitored.max_partition_line_count = Some(10);
    let mut reporter = ScriptedReporter::new(Some(cycler_mapping()));
    reporter.rejected_partitions = vec![1];

    let outcome = harvest(&file, &monitored, &reporter, &options(&dir.path().join("scratch"))).unwrap();

    assert_eq!(outcome.status, HarvestStatus::Complete);
    assert_eq!(outcome.successes(), 2);
    let complete = reporter.report_with_stage("upload complete").unwrap();
    assert_eq!(
        complete["content"]["data"],
        json!({
            "successes": 2,
            "errors": {"1": "Failed to upload cell.part_1.parquet. Received HTTP 500"},
        })
    );
    assert_eq!(reporter.stages().last().map(String::as_str), Some("harvest complete"));
}

#[test]
fn total_upload_failure_fails_the_harvest() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch");
    let file = write_file(dir.path(), "cell.csv", cycler_csv(30));
    let mut monitored = MonitoredPath::new("p1", dir.path());
    monitored.max_partition_line_count = Some(10);
    let mut reporter = ScriptedReporter::new(Some(cycler_mapping()));
    reporter.rejected_partitions = vec![0, 1, 2];

    let err = harvest(&file, &monitored, &reporter, &options(&scratch)).unwrap_err();

    assert!(matches!(err, HarvestError::TotalUploadFailure { partition_count: 3 }));
    assert_eq!(
        reporter.stages(),
        vec!["file metadata", "data summary", "harvest failed"]
    );
    let failed = reporter.report_with_stage("harvest failed").unwrap();
    assert_eq!(
        failed["content"]["error"],
        "Error in Harvester. TotalUploadFailure: failed to upload all 3 partitions to server. \
         [See harvester logs for more details]"
    );
    assert!(scratch_is_empty(&scratch));
}

#[test]
fn rejected_metadata_report_abandons_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "cell.csv", cycler_csv(30));
    let monitored = MonitoredPath::new("p1", dir.path());
    let mut reporter = ScriptedReporter::new(Some(cycler_mapping()));
    reporter.rejected_stage = Some("file metadata");

    let err = harvest(&file, &monitored, &reporter, &options(&dir.path().join("scratch"))).unwrap_err();

    assert_eq!(err.kind(), "TransportError");
    assert_eq!(reporter.stages(), vec!["file metadata", "harvest failed"]);
    assert!(reporter.uploads.lock().unwrap().is_empty());
}

#[test]
fn mapping_collision_is_a_conversion_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "cell.csv", cycler_csv(30));
    let monitored = MonitoredPath::new("p1", dir.path());
    let reporter = ScriptedReporter::new(Some(json!({
        "time": {"new_name": "voltage", "data_type": "float"},
    })));

    let err = harvest(&file, &monitored, &reporter, &options(&dir.path().join("scratch"))).unwrap_err();

    assert!(matches!(err, HarvestError::MappingCollision { .. }));
    assert_eq!(reporter.stages().last().map(String::as_str), Some("harvest failed"));
    assert!(reporter.uploads.lock().unwrap().is_empty());
}

#[test]
fn files_without_plot_columns_upload_no_plot() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "cell.csv", cycler_csv(12));
    let monitored = MonitoredPath::new("p1", dir.path());
    let reporter = ScriptedReporter::new(Some(json!({})));

    let outcome = harvest(&file, &monitored, &reporter, &options(&dir.path().join("scratch"))).unwrap();

    assert_eq!(outcome.status, HarvestStatus::Complete);
    assert!(!outcome.plot_uploaded);
    let uploads = reporter.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].part, "parquet_file");
}
