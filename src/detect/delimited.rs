//! Generic delimited-text capability, the registry's universal fallback.
//!
//! Structure is recovered by [`DelimitedSniffer`] once, at probe time; every later call to
//! [`FormatCapability::rows`] re-opens the file and streams it with the detected dialect.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{HarvestResult, ProbeError};
use crate::metadata::{FileMetadata, MetaValue};
use crate::types::{ColumnInfo, RawRow, Value};

use super::capability::{CapabilityProbe, FormatCapability, RowIter};
use super::sniffer::{Dialect, DelimitedSniffer, SniffReport};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Probe for delimited text with optional preamble and header.
#[derive(Debug, Clone, Default)]
pub struct DelimitedProbe {
    sniffer: DelimitedSniffer,
}

impl DelimitedProbe {
    pub fn new(sniffer: DelimitedSniffer) -> Self {
        Self { sniffer }
    }
}

impl CapabilityProbe for DelimitedProbe {
    fn name(&self) -> &str {
        "Delimited"
    }

    fn probe(&self, path: &Path) -> Result<Box<dyn FormatCapability>, ProbeError> {
        let head = read_head(path, self.sniffer.head_lines())?;
        let report = self.sniffer.sniff(&head)?;
        tracing::info!(
            path = %path.display(),
            delimiter = %char::from(report.dialect.delimiter).escape_default(),
            has_header = report.has_header,
            preamble_lines = report.preamble_lines,
            "type is Delimited"
        );
        Ok(Box::new(DelimitedCapability::new(path, report)))
    }
}

/// Read up to `max_lines` lines as text.
///
/// The first line must be valid UTF-8; later lines are decoded lossily since they only feed
/// heuristics.
fn read_head(path: &Path, max_lines: usize) -> Result<String, ProbeError> {
    let mut reader = BufReader::new(File::open(path).map_err(crate::error::HarvestError::from)?);
    let mut head = String::new();
    let mut buf = Vec::new();
    for n in 0..max_lines {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(crate::error::HarvestError::from)?;
        if read == 0 {
            break;
        }
        match std::str::from_utf8(&buf) {
            Ok(line) => head.push_str(line),
            Err(_) if n == 0 => {
                return Err(ProbeError::not_applicable("first line is not valid UTF-8 text"));
            }
            Err(_) => head.push_str(&String::from_utf8_lossy(&buf)),
        }
    }
    Ok(head)
}

/// A delimited file bound to its sniffed structure.
#[derive(Debug)]
pub struct DelimitedCapability {
    path: PathBuf,
    report: SniffReport,
    columns: ColumnInfo,
}

impl DelimitedCapability {
    fn new(path: &Path, report: SniffReport) -> Self {
        let columns = ColumnInfo::all_with_data(report.header.iter().cloned());
        Self {
            path: path.to_path_buf(),
            report,
            columns,
        }
    }

    /// The structure recovered at probe time.
    pub fn sniff_report(&self) -> &SniffReport {
        &self.report
    }
}

impl FormatCapability for DelimitedCapability {
    fn name(&self) -> &str {
        "Delimited"
    }

    fn column_info(&self) -> &ColumnInfo {
        &self.columns
    }

    fn metadata(&self) -> HarvestResult<FileMetadata> {
        let mut core = BTreeMap::new();
        core.insert(
            "preamble".to_string(),
            MetaValue::from(self.report.preamble.clone()),
        );
        Ok(FileMetadata {
            core,
            extra: has_data_extra(&self.columns),
        })
    }

    fn rows(&self, columns: &[String]) -> HarvestResult<RowIter<'_>> {
        stream_rows(
            &self.path,
            self.report.dialect,
            self.report.preamble_lines,
            self.report.has_header,
            &self.report.header,
            columns,
        )
    }
}

/// `{column: {"has_data": true}}` for every column flagged as carrying data.
pub(crate) fn has_data_extra(columns: &ColumnInfo) -> BTreeMap<String, BTreeMap<String, MetaValue>> {
    columns
        .iter()
        .map(|(name, meta)| {
            let mut entry = BTreeMap::new();
            entry.insert("has_data".to_string(), MetaValue::Bool(meta.has_data));
            if let Some(unit) = &meta.unit {
                entry.insert("unit".to_string(), MetaValue::Text(unit.clone()));
            }
            (name.to_string(), entry)
        })
        .collect()
}

/// Stream a delimited file from line `data_start`, skipping one header record if present.
///
/// Only the requested `columns` that exist in `header` are yielded; short records leave the
/// missing cells null.
pub(crate) fn stream_rows(
    path: &Path,
    dialect: Dialect,
    data_start: usize,
    has_header: bool,
    header: &[String],
    columns: &[String],
) -> HarvestResult<RowIter<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    skip_bom(&mut reader)?;
    let mut buf = Vec::new();
    for _ in 0..data_start {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
    }

    let selected: Arc<[(usize, String)]> = columns
        .iter()
        .filter_map(|c| header.iter().position(|h| h == c).map(|i| (i, c.clone())))
        .collect();

    let records = dialect.reader_builder().from_reader(reader).into_records();
    let skip = usize::from(has_header);
    Ok(Box::new(records.skip(skip).map(move |record| {
        let record = record?;
        let row: RawRow = selected
            .iter()
            .map(|(idx, name)| {
                let value = record
                    .get(*idx)
                    .map(|cell| Value::Utf8(cell.to_string()))
                    .unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect();
        Ok(row)
    })))
}

fn skip_bom<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    if reader.fill_buf()?.starts_with(UTF8_BOM) {
        reader.consume(UTF8_BOM.len());
    }
    Ok(())
}
