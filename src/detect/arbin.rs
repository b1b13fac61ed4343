//! Arbin cycler CSV exports.
//!
//! These are plain comma-separated files with a header, but the date/time column contains spaces,
//! which makes the generic sniffer prefer the wrong delimiter. They are recognized by their first
//! three header columns instead.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{HarvestError, HarvestResult, ProbeError};
use crate::metadata::FileMetadata;
use crate::types::ColumnInfo;

use super::capability::{CapabilityProbe, FormatCapability, RowIter};
use super::delimited::{has_data_extra, stream_rows};
use super::sniffer::Dialect;

const LEADING_COLUMNS: [&str; 3] = ["data_point", "date_time", "test_time(s)"];

const ARBIN_DIALECT: Dialect = Dialect {
    delimiter: b',',
    quote: b'"',
    skip_initial_space: false,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ArbinCsvProbe;

impl CapabilityProbe for ArbinCsvProbe {
    fn name(&self) -> &str {
        "ArbinCsv"
    }

    fn probe(&self, path: &Path) -> Result<Box<dyn FormatCapability>, ProbeError> {
        let mut reader = BufReader::new(File::open(path).map_err(HarvestError::from)?);
        if reader.fill_buf().map_err(HarvestError::from)?.starts_with(b"\xEF\xBB\xBF") {
            reader.consume(3);
        }
        let mut records = ARBIN_DIALECT.reader_builder().from_reader(reader).into_records();

        let header = match records.next() {
            Some(Ok(record)) => record,
            _ => return Err(ProbeError::not_applicable("no readable header row")),
        };
        let leading: Vec<String> = header.iter().take(3).map(str::to_lowercase).collect();
        if leading != LEADING_COLUMNS {
            return Err(ProbeError::not_applicable("header does not start with Arbin columns"));
        }
        match records.next() {
            Some(Ok(first)) if first.len() == header.len() => {}
            _ => return Err(ProbeError::not_applicable("first data row does not match header")),
        }

        tracing::info!(path = %path.display(), "type is Arbin CSV");
        let header: Vec<String> = header.iter().map(str::to_string).collect();
        Ok(Box::new(ArbinCsvCapability {
            path: path.to_path_buf(),
            columns: ColumnInfo::all_with_data(header.iter().cloned()),
            header,
        }))
    }
}

#[derive(Debug)]
pub struct ArbinCsvCapability {
    path: PathBuf,
    header: Vec<String>,
    columns: ColumnInfo,
}

impl FormatCapability for ArbinCsvCapability {
    fn name(&self) -> &str {
        "ArbinCsv"
    }

    fn column_info(&self) -> &ColumnInfo {
        &self.columns
    }

    fn metadata(&self) -> HarvestResult<FileMetadata> {
        Ok(FileMetadata {
            core: BTreeMap::new(),
            extra: has_data_extra(&self.columns),
        })
    }

    fn rows(&self, columns: &[String]) -> HarvestResult<RowIter<'_>> {
        stream_rows(&self.path, ARBIN_DIALECT, 0, true, &self.header, columns)
    }
}
