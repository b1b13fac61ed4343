//! Row-count partitioning of a capability's row stream into Parquet files.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};

use crate::detect::FormatCapability;
use crate::error::HarvestResult;
use crate::remap::{ColumnMapping, ColumnRemapper};
use crate::types::{RawRow, Schema};

use super::parquet::write_partition;
use super::plot::{PlotCollector, PlotSeries};

/// One persisted partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    pub index: usize,
    pub path: PathBuf,
    pub row_count: usize,
}

/// Result of a completed conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedData {
    /// Directory holding `part.{i}.parquet` files.
    pub directory: PathBuf,
    /// Partitions in source order.
    pub partitions: Vec<PartitionFile>,
    pub total_rows: usize,
    pub schema: Schema,
    /// Plot points, when the converted data has the plotted columns.
    pub plot: Option<PlotSeries>,
}

impl ConvertedData {
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

/// Converts rows into remapped, size-bounded partitions.
#[derive(Debug, Clone)]
pub struct PartitionedConverter {
    partition_rows: usize,
    producer_version: String,
    collect_plot: bool,
}

impl PartitionedConverter {
    /// `partition_rows` of zero is treated as one.
    pub fn new(partition_rows: usize, producer_version: impl Into<String>) -> Self {
        Self {
            partition_rows: partition_rows.max(1),
            producer_version: producer_version.into(),
            collect_plot: true,
        }
    }

    pub fn with_plot(mut self, collect_plot: bool) -> Self {
        self.collect_plot = collect_plot;
        self
    }

    pub fn partition_rows(&self) -> usize {
        self.partition_rows
    }

    /// Convert the data columns of `capability` into `directory`.
    pub fn convert(
        &self,
        capability: &dyn FormatCapability,
        mapping: &ColumnMapping,
        directory: &Path,
    ) -> HarvestResult<ConvertedData> {
        let columns = capability.column_info().data_columns();
        let remapper = ColumnRemapper::new(mapping, &columns)?;
        self.convert_rows(capability.rows(&columns)?, &remapper, directory)
    }

    /// Convert an arbitrary row stream.
    ///
    /// A partition is closed when it reaches the row limit or the stream ends; an empty stream
    /// produces no partitions.
    pub fn convert_rows<I>(
        &self,
        rows: I,
        remapper: &ColumnRemapper,
        directory: &Path,
    ) -> HarvestResult<ConvertedData>
    where
        I: IntoIterator<Item = HarvestResult<RawRow>>,
    {
        let started = Instant::now();
        std::fs::create_dir_all(directory)?;

        let mut plot = if self.collect_plot {
            PlotCollector::for_schema(remapper.schema())
        } else {
            None
        };
        let mut partitions = Vec::new();
        let mut total_rows = 0;
        let mut buffer: Vec<RawRow> = Vec::with_capacity(self.partition_rows.min(16_384));

        let mut flush = |buffer: &mut Vec<RawRow>, partitions: &mut Vec<PartitionFile>| -> HarvestResult<()> {
            let index = partitions.len();
            let batch = remapper.remap(buffer)?;
            if let Some(plot) = plot.as_mut() {
                plot.observe(&batch);
            }
            let path = directory.join(format!("part.{index}.parquet"));
            write_partition(&path, &batch, &self.producer_version)?;
            debug!(index, rows = batch.row_count(), path = %path.display(), "wrote partition");
            partitions.push(PartitionFile {
                index,
                path,
                row_count: batch.row_count(),
            });
            buffer.clear();
            Ok(())
        };

        for row in rows {
            buffer.push(row?);
            total_rows += 1;
            if buffer.len() == self.partition_rows {
                flush(&mut buffer, &mut partitions)?;
            }
        }
        if !buffer.is_empty() {
            flush(&mut buffer, &mut partitions)?;
        }

        info!(
            rows = total_rows,
            partitions = partitions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "converted data"
        );
        Ok(ConvertedData {
            directory: directory.to_path_buf(),
            partitions,
            total_rows,
            schema: remapper.schema().clone(),
            plot: plot.map(PlotCollector::finish),
        })
    }
}
