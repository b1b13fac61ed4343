#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Value as Json, json};

use instrument_harvester::harvest::{Reply, Report, Reporter, Upload};

pub const MAPPING_URL: &str = "http://service.test/mappings/1/";

/// A reporting service that records every call and answers from a script.
pub struct ScriptedReporter {
    pub reports: Mutex<Vec<Report>>,
    pub uploads: Mutex<Vec<Upload>>,
    /// State returned for `file_size` reports.
    pub file_state: String,
    /// `rendered_map` returned by the mapping endpoint; `None` means no mapping is assigned.
    pub mapping: Option<Json>,
    /// Partition numbers whose upload is rejected.
    pub rejected_partitions: Vec<usize>,
    /// Reject every plain report with this stage.
    pub rejected_stage: Option<&'static str>,
    /// Uploaded files are copied here before the harvester deletes its scratch space.
    pub keep_dir: Option<PathBuf>,
}

impl ScriptedReporter {
    pub fn new(mapping: Option<Json>) -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            file_state: "STABLE".to_string(),
            mapping,
            rejected_partitions: Vec::new(),
            rejected_stage: None,
            keep_dir: None,
        }
    }

    pub fn stages(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.stage_name().map(str::to_string))
            .collect()
    }

    pub fn tasks(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.task().map(str::to_string))
            .collect()
    }

    pub fn report_with_stage(&self, stage: &str) -> Option<Json> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.stage_name() == Some(stage))
            .map(Report::to_json)
    }
}

impl Reporter for ScriptedReporter {
    fn report(&self, report: &Report) -> Reply {
        self.reports.lock().unwrap().push(report.clone());
        if report.stage_name().is_some() && report.stage_name() == self.rejected_stage {
            return Reply::Rejected {
                status: 500,
                error: None,
            };
        }
        match (report.task(), report.stage_name()) {
            (Some("file_size"), _) => Reply::Accepted(json!({"state": self.file_state})),
            (_, Some("data summary")) => Reply::Accepted(json!({
                "mapping": if self.mapping.is_some() { json!(MAPPING_URL) } else { Json::Null },
            })),
            _ => Reply::Accepted(json!({})),
        }
    }

    fn upload(&self, upload: &Upload) -> Reply {
        self.uploads.lock().unwrap().push(upload.clone());
        if let Some(dir) = &self.keep_dir {
            std::fs::copy(&upload.file, dir.join(&upload.fields.filename)).unwrap();
        }
        match upload.fields.partition_number {
            Some(n) if self.rejected_partitions.contains(&n) => Reply::Rejected {
                status: 500,
                error: None,
            },
            _ => Reply::Accepted(json!({})),
        }
    }

    fn fetch_mapping(&self, reference: &str) -> Reply {
        assert_eq!(reference, MAPPING_URL);
        match &self.mapping {
            Some(map) => Reply::Accepted(json!({"rendered_map": map})),
            None => Reply::Accepted(json!({"rendered_map": null})),
        }
    }
}

/// `time,voltage,current` header followed by `rows` data rows.
pub fn cycler_csv(rows: usize) -> String {
    let mut out = String::from("time,voltage,current\n");
    for i in 0..rows {
        out.push_str(&format!("{i},{:.3},{:.2}\n", 3.0 + i as f64 * 0.001, 0.5 - i as f64 * 0.01));
    }
    out
}

/// Maps the cycler columns onto the plotted column names.
pub fn cycler_mapping() -> Json {
    json!({
        "time": {"new_name": "ElapsedTime_s", "data_type": "float"},
        "voltage": {"new_name": "Voltage_V", "data_type": "float"},
        "current": {"new_name": "Current_A", "data_type": "float", "multiplier": 0.001},
    })
}

pub fn write_file(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}
