//! The request/response contract with the reporting service.
//!
//! Every call is about one file of one monitored path. Plain reports carry
//! `{status, content | error, path, monitored_path_id}`; uploads carry a flat field set plus one
//! file part.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Value as Json, json};

use crate::error::{HarvestError, HarvestResult};

pub const TASK_FILE_SIZE: &str = "file_size";
pub const TASK_IMPORT: &str = "import";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

pub const STAGE_FILE_METADATA: &str = "file metadata";
pub const STAGE_DATA_SUMMARY: &str = "data summary";
pub const STAGE_UPLOAD_PARQUET: &str = "upload parquet partitions";
pub const STAGE_UPLOAD_COMPLETE: &str = "upload complete";
pub const STAGE_UPLOAD_PNG: &str = "upload png";
pub const STAGE_COMPLETE: &str = "harvest complete";
pub const STAGE_FAILED: &str = "harvest failed";

/// Multipart field name of a partition upload.
pub const PARQUET_FILE_PART: &str = "parquet_file";
/// Multipart field name of the plot upload.
pub const PNG_FILE_PART: &str = "png_file";

/// What a report carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportBody {
    /// `status: success` with arbitrary `content`.
    Content(Json),
    /// `status: error` with an error string.
    Error(String),
}

/// A JSON report about one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub path: PathBuf,
    pub monitored_path_id: String,
    pub body: ReportBody,
}

impl Report {
    pub fn content(path: &Path, monitored_path_id: &str, content: Json) -> Self {
        Self {
            path: path.to_path_buf(),
            monitored_path_id: monitored_path_id.to_string(),
            body: ReportBody::Content(content),
        }
    }

    /// An import-stage report: `{task: "import", stage, data}`.
    pub fn stage(path: &Path, monitored_path_id: &str, stage: &str, data: Json) -> Self {
        Self::content(
            path,
            monitored_path_id,
            json!({"task": TASK_IMPORT, "stage": stage, "data": data}),
        )
    }

    pub fn error(path: &Path, monitored_path_id: &str, error: &HarvestError) -> Self {
        Self {
            path: path.to_path_buf(),
            monitored_path_id: monitored_path_id.to_string(),
            body: ReportBody::Error(format!("{}: {error}", error.kind())),
        }
    }

    /// The task named in the content, if any.
    pub fn task(&self) -> Option<&str> {
        match &self.body {
            ReportBody::Content(c) => c.get("task").and_then(Json::as_str),
            ReportBody::Error(_) => None,
        }
    }

    /// The stage named in the content, if any.
    pub fn stage_name(&self) -> Option<&str> {
        match &self.body {
            ReportBody::Content(c) => c.get("stage").and_then(Json::as_str),
            ReportBody::Error(_) => None,
        }
    }

    /// The wire payload. NUL characters are removed from every string.
    pub fn to_json(&self) -> Json {
        let mut payload = match &self.body {
            ReportBody::Content(c) => json!({"status": STATUS_SUCCESS, "content": c}),
            ReportBody::Error(e) => json!({"status": STATUS_ERROR, "error": e}),
        };
        payload["path"] = Json::String(self.path.display().to_string());
        payload["monitored_path_id"] = Json::String(self.monitored_path_id.clone());
        strip_nul(&mut payload);
        payload
    }
}

fn strip_nul(value: &mut Json) {
    match value {
        Json::String(s) if s.contains('\0') => *s = s.replace('\0', ""),
        Json::Array(items) => items.iter_mut().for_each(strip_nul),
        Json::Object(map) => {
            let keys: Vec<String> = map.keys().filter(|k| k.contains('\0')).cloned().collect();
            for key in keys {
                if let Some(v) = map.remove(&key) {
                    map.insert(key.replace('\0', ""), v);
                }
            }
            map.values_mut().for_each(strip_nul);
        }
        _ => {}
    }
}

/// Flat form fields accompanying an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadFields {
    pub format: &'static str,
    pub status: &'static str,
    pub path: String,
    pub monitored_path_id: String,
    pub task: &'static str,
    pub stage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_number: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_count: Option<usize>,
    pub filename: String,
}

impl UploadFields {
    /// Form fields as `(name, value)` text pairs; absent optional fields are omitted.
    pub fn form_pairs(&self) -> Vec<(String, String)> {
        let Ok(Json::Object(map)) = serde_json::to_value(self) else {
            return Vec::new();
        };
        map.into_iter()
            .map(|(k, v)| {
                let text = match v {
                    Json::String(s) => s,
                    other => other.to_string(),
                };
                (k, text)
            })
            .collect()
    }
}

/// A file upload about one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub fields: UploadFields,
    /// Multipart field carrying the file.
    pub part: &'static str,
    /// Local file to send; sent under `fields.filename`.
    pub file: PathBuf,
}

impl Upload {
    pub fn partition(
        path: &Path,
        monitored_path_id: &str,
        file: &Path,
        filename: String,
        partition_number: usize,
        partition_count: usize,
        total_row_count: usize,
    ) -> Self {
        Self {
            fields: UploadFields {
                format: "flat",
                status: STATUS_SUCCESS,
                path: path.display().to_string(),
                monitored_path_id: monitored_path_id.to_string(),
                task: TASK_IMPORT,
                stage: STAGE_UPLOAD_PARQUET,
                total_row_count: Some(total_row_count),
                partition_number: Some(partition_number),
                partition_count: Some(partition_count),
                filename,
            },
            part: PARQUET_FILE_PART,
            file: file.to_path_buf(),
        }
    }

    pub fn plot(path: &Path, monitored_path_id: &str, file: &Path) -> Self {
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            fields: UploadFields {
                format: "flat",
                status: STATUS_SUCCESS,
                path: path.display().to_string(),
                monitored_path_id: monitored_path_id.to_string(),
                task: TASK_IMPORT,
                stage: STAGE_UPLOAD_PNG,
                total_row_count: None,
                partition_number: None,
                partition_count: None,
                filename,
            },
            part: PNG_FILE_PART,
            file: file.to_path_buf(),
        }
    }
}

/// Outcome of a call to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// 2xx with a JSON body.
    Accepted(Json),
    /// The service answered with an error status.
    Rejected { status: u16, error: Option<String> },
    /// No usable answer (transport failure, non-JSON body).
    NoResponse(String),
}

impl Reply {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Reply::Accepted(_))
    }

    /// The body of an accepted reply, or a transport error naming `step`.
    pub fn into_result(self, step: &str) -> HarvestResult<Json> {
        match self {
            Reply::Accepted(body) => Ok(body),
            Reply::Rejected { status, error } => Err(HarvestError::NoResponse {
                step: step.to_string(),
                reason: match error {
                    Some(e) => format!("server responded with error: {e}"),
                    None => format!("received HTTP {status}"),
                },
            }),
            Reply::NoResponse(reason) => Err(HarvestError::NoResponse {
                step: step.to_string(),
                reason,
            }),
        }
    }
}

/// Transport to the reporting service.
///
/// Implementations must not fail: every problem is expressed as a non-accepted [`Reply`].
pub trait Reporter: Send + Sync {
    fn report(&self, report: &Report) -> Reply;

    fn upload(&self, upload: &Upload) -> Reply;

    /// Follow a mapping reference returned by the data summary report.
    fn fetch_mapping(&self, reference: &str) -> Reply;
}

impl<R: Reporter + ?Sized> Reporter for std::sync::Arc<R> {
    fn report(&self, report: &Report) -> Reply {
        (**self).report(report)
    }

    fn upload(&self, upload: &Upload) -> Reply {
        (**self).upload(upload)
    }

    fn fetch_mapping(&self, reference: &str) -> Reply {
        (**self).fetch_mapping(reference)
    }
}

/// `{stem}.part_{index}.parquet`, with the index zero-padded to `count / 10 + 1` digits.
pub fn partition_filename(source: &Path, index: usize, count: usize) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let width = count / 10 + 1;
    format!("{stem}.part_{index:0width$}.parquet")
}
