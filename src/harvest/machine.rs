//! The per-file harvest pipeline.
//!
//! A file moves strictly forward through
//! `Detected → MetadataReported → SummaryReported → Converted → Uploaded → Complete`.
//! Without a mapping it stops at `SummaryReported` and still sends `harvest complete`; that is a
//! normal outcome, and a later pass can run the machine again. Any error abandons the file: a `harvest failed` report is sent and
//! the error is returned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::{Map, Value as Json, json};
use tracing::{error, info, warn};

use crate::config::{HarvestOptions, MonitoredPath};
use crate::convert::plot::render_svg;
use crate::convert::{ConvertedData, PartitionedConverter, ScratchSpace};
use crate::detect::FormatCapability;
use crate::error::{HarvestError, HarvestResult};
use crate::metadata::map_to_json;
use crate::remap::ColumnMapping;
use crate::types::{RawRow, Value};

use super::observer::{HarvestContext, HarvestObserver, notify_failure};
use super::report::{
    Reply, Report, Reporter, STAGE_COMPLETE, STAGE_DATA_SUMMARY, STAGE_FAILED,
    STAGE_FILE_METADATA, STAGE_UPLOAD_COMPLETE, STAGE_UPLOAD_PNG, TASK_IMPORT, Upload,
    partition_filename,
};

/// Pipeline position of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HarvestState {
    Detected,
    MetadataReported,
    SummaryReported,
    Converted,
    Uploaded,
    Complete,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestStatus {
    /// Data was converted and uploaded.
    Complete,
    /// The service has no mapping for this file yet.
    AwaitingMapping,
}

/// Result of one partition upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionUpload {
    pub index: usize,
    pub filename: String,
    /// `None` on success.
    pub error: Option<String>,
}

/// What happened to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestOutcome {
    pub status: HarvestStatus,
    pub state: HarvestState,
    pub total_rows: usize,
    pub partition_count: usize,
    /// Every attempted partition, in order.
    pub partitions: Vec<PartitionUpload>,
    pub plot_uploaded: bool,
}

impl HarvestOutcome {
    fn awaiting_mapping() -> Self {
        Self {
            status: HarvestStatus::AwaitingMapping,
            state: HarvestState::SummaryReported,
            total_rows: 0,
            partition_count: 0,
            partitions: Vec::new(),
            plot_uploaded: false,
        }
    }

    pub fn successes(&self) -> usize {
        self.partitions.iter().filter(|p| p.error.is_none()).count()
    }

    /// Failed partition index → reason.
    pub fn errors(&self) -> BTreeMap<usize, String> {
        self.partitions
            .iter()
            .filter_map(|p| p.error.clone().map(|e| (p.index, e)))
            .collect()
    }
}

/// Drives one file through the pipeline.
pub struct HarvestStateMachine<'a> {
    path: PathBuf,
    capability: Box<dyn FormatCapability>,
    monitored_path: &'a MonitoredPath,
    reporter: &'a dyn Reporter,
    observer: &'a dyn HarvestObserver,
    options: &'a HarvestOptions,
    ctx: HarvestContext,
    state: HarvestState,
    scratch: Option<ScratchSpace>,
}

impl<'a> HarvestStateMachine<'a> {
    /// Start in [`HarvestState::Detected`] with the capability bound to `path`.
    pub fn new(
        path: &Path,
        capability: Box<dyn FormatCapability>,
        monitored_path: &'a MonitoredPath,
        reporter: &'a dyn Reporter,
        observer: &'a dyn HarvestObserver,
        options: &'a HarvestOptions,
    ) -> Self {
        let ctx = HarvestContext::new(path, monitored_path.id.clone());
        observer.on_detected(&ctx, capability.name());
        Self {
            path: path.to_path_buf(),
            capability,
            monitored_path,
            reporter,
            observer,
            options,
            ctx,
            state: HarvestState::Detected,
            scratch: None,
        }
    }

    pub fn state(&self) -> HarvestState {
        self.state
    }

    /// Run the pipeline to its end.
    ///
    /// Temporary artifacts are released on every path.
    pub fn run(mut self) -> HarvestResult<HarvestOutcome> {
        let result = self.advance();
        let released = self.scratch.take().map(ScratchSpace::release);
        if let Some(Err(e)) = released {
            self.observer
                .on_warning(&self.ctx, &format!("failed to delete temporary files: {e}"));
        }

        match result {
            Ok(outcome) => {
                // Sent for a missing mapping too; the machine itself stays in SummaryReported.
                self.send_terminal(json!({"task": TASK_IMPORT, "stage": STAGE_COMPLETE}));
                if outcome.status == HarvestStatus::Complete {
                    self.state = HarvestState::Complete;
                    info!(path = %self.path.display(), "harvest complete");
                }
                Ok(HarvestOutcome {
                    state: self.state,
                    ..outcome
                })
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    state = ?self.state,
                    kind = e.kind(),
                    "harvest failed: {e}"
                );
                notify_failure(self.observer, &self.ctx, &e, self.options.alert_at_or_above);
                self.send_terminal(json!({
                    "task": TASK_IMPORT,
                    "stage": STAGE_FAILED,
                    "error": format!(
                        "Error in Harvester. {}: {e}. [See harvester logs for more details]",
                        e.kind()
                    ),
                }));
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> HarvestResult<HarvestOutcome> {
        let started = Instant::now();
        self.report_metadata()?;
        info!(elapsed_ms = elapsed_ms(started), "metadata reported");

        let started = Instant::now();
        let Some(mapping) = self.report_summary()? else {
            info!(
                path = %self.path.display(),
                "mapping could not be determined; will revisit when one is assigned"
            );
            return Ok(HarvestOutcome::awaiting_mapping());
        };
        info!(elapsed_ms = elapsed_ms(started), "column summary reported");

        let started = Instant::now();
        let (converted, plot) = self.convert(&mapping)?;
        info!(elapsed_ms = elapsed_ms(started), "data prepared");

        let started = Instant::now();
        let outcome = self.upload(&converted, plot.as_deref())?;
        info!(elapsed_ms = elapsed_ms(started), "data uploaded");
        Ok(outcome)
    }

    fn report_metadata(&mut self) -> HarvestResult<()> {
        let metadata = self.capability.metadata()?;
        let data = json!({
            "core_metadata": map_to_json(&metadata.core),
            "extra_metadata": metadata.extra_json(),
            "test_date": metadata.test_date(),
            "parser": self.capability.name(),
        });
        self.stage_report(STAGE_FILE_METADATA, data, "Report Metadata")?;
        self.state = HarvestState::MetadataReported;
        Ok(())
    }

    /// Report a preview and resolve the mapping, if the service has one.
    fn report_summary(&mut self) -> HarvestResult<Option<ColumnMapping>> {
        let columns = self.capability.column_info().data_columns();
        let rows = self
            .capability
            .rows(&columns)?
            .take(self.options.summary_rows)
            .collect::<HarvestResult<Vec<_>>>()?;
        let table = summary_table(&columns, &rows);

        let body = self.stage_report(
            STAGE_DATA_SUMMARY,
            Json::String(table.to_string()),
            "Report Column Metadata",
        )?;
        self.state = HarvestState::SummaryReported;

        let Some(reference) = body.get("mapping").and_then(Json::as_str) else {
            return Ok(None);
        };
        let mapping = self.reporter.fetch_mapping(reference).into_result("Get Mapping")?;
        match mapping.get("rendered_map") {
            Some(rendered @ Json::Object(_)) => Ok(Some(ColumnMapping::from_json(rendered)?)),
            _ => {
                error!(reference, "server returned mapping request but no mapping was found");
                Ok(None)
            }
        }
    }

    fn convert(&mut self, mapping: &ColumnMapping) -> HarvestResult<(ConvertedData, Option<PathBuf>)> {
        let scratch = ScratchSpace::create(self.options.scratch_root.as_deref())?;
        let basename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data".to_string());
        let data_dir = scratch.path().join(format!("{basename}.parquet"));
        let plot_path = scratch.path().join(format!("{basename}.svg"));
        self.scratch = Some(scratch);

        let converter = PartitionedConverter::new(
            self.monitored_path.partition_rows(self.options),
            self.options.producer_version.clone(),
        )
        .with_plot(self.options.render_plot);
        let converted = converter.convert(self.capability.as_ref(), mapping, &data_dir)?;

        let plot = match &converted.plot {
            Some(series) if self.options.render_plot => match render_svg(series, &plot_path) {
                Ok(()) => Some(plot_path),
                Err(e) => {
                    self.observer
                        .on_warning(&self.ctx, &format!("failed to create plot: {e}"));
                    None
                }
            },
            _ => None,
        };
        self.state = HarvestState::Converted;
        Ok((converted, plot))
    }

    fn upload(&mut self, converted: &ConvertedData, plot: Option<&Path>) -> HarvestResult<HarvestOutcome> {
        let count = converted.partition_count();
        let mut partitions = Vec::with_capacity(count);
        for part in &converted.partitions {
            let filename = partition_filename(&self.path, part.index, count);
            let upload = Upload::partition(
                &self.path,
                &self.monitored_path.id,
                &part.path,
                filename.clone(),
                part.index,
                count,
                converted.total_rows,
            );
            let error = match self.reporter.upload(&upload) {
                Reply::Accepted(_) => None,
                Reply::NoResponse(_) => Some(format!(
                    "Failed to upload {filename} - API Error: no response from server"
                )),
                Reply::Rejected {
                    error: Some(e), ..
                } => Some(format!("Failed to upload {filename} - API responded with Error: {e}")),
                Reply::Rejected { status, error: None } => {
                    Some(format!("Failed to upload {filename}. Received HTTP {status}"))
                }
            };
            partitions.push(PartitionUpload {
                index: part.index,
                filename,
                error,
            });
        }

        let mut outcome = HarvestOutcome {
            status: HarvestStatus::Complete,
            state: HarvestState::Uploaded,
            total_rows: converted.total_rows,
            partition_count: count,
            partitions,
            plot_uploaded: false,
        };
        let successes = outcome.successes();
        if successes == 0 && count > 0 {
            return Err(HarvestError::TotalUploadFailure {
                partition_count: count,
            });
        }
        let errors = outcome.errors();
        if errors.is_empty() {
            info!(successes, "all partitions uploaded");
        } else {
            error!(successes, partition_count = count, "some partitions failed to upload");
            for (index, reason) in &errors {
                error!(index, "{reason}");
            }
        }

        let reply = self.reporter.report(&Report::stage(
            &self.path,
            &self.monitored_path.id,
            STAGE_UPLOAD_COMPLETE,
            json!({"successes": successes, "errors": errors}),
        ));
        if reply.is_accepted() {
            self.observer.on_stage(&self.ctx, STAGE_UPLOAD_COMPLETE);
        } else {
            warn!(?reply, "upload complete report was not accepted");
        }

        if let Some(plot) = plot {
            let reply = self
                .reporter
                .upload(&Upload::plot(&self.path, &self.monitored_path.id, plot));
            match reply.into_result("Upload PNG") {
                Ok(_) => {
                    outcome.plot_uploaded = true;
                    self.observer.on_stage(&self.ctx, STAGE_UPLOAD_PNG);
                }
                Err(e) => self
                    .observer
                    .on_warning(&self.ctx, &format!("failed to upload plot: {e}")),
            }
        }

        self.state = HarvestState::Uploaded;
        Ok(outcome)
    }

    fn stage_report(&self, stage: &str, data: Json, step: &str) -> HarvestResult<Json> {
        let body = self
            .reporter
            .report(&Report::stage(&self.path, &self.monitored_path.id, stage, data))
            .into_result(step)?;
        self.observer.on_stage(&self.ctx, stage);
        Ok(body)
    }

    fn send_terminal(&self, content: Json) {
        let reply = self
            .reporter
            .report(&Report::content(&self.path, &self.monitored_path.id, content));
        if !reply.is_accepted() {
            warn!(path = %self.path.display(), ?reply, "terminal report was not accepted");
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Column-oriented preview: `{column: {"0": v0, "1": v1, ...}}`.
fn summary_table(columns: &[String], rows: &[RawRow]) -> Json {
    let mut table = Map::new();
    if rows.is_empty() {
        return Json::Object(table);
    }
    for column in columns {
        let values: Map<String, Json> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let v = row.get(column).map(Value::to_json).unwrap_or(Json::Null);
                (i.to_string(), v)
            })
            .collect();
        table.insert(column.clone(), Json::Object(values));
    }
    Json::Object(table)
}
