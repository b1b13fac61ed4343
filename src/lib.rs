//! `instrument-harvester` watches directories of scientific-instrument output, recognizes the
//! files it can read, normalizes them into partitioned Parquet and reports each file stage by
//! stage to a remote service.
//!
//! ## Pipeline
//!
//! For every file under a [`config::MonitoredPath`]:
//!
//! 1. [`detect::FormatRegistry::dispatch`] binds the first [`detect::FormatCapability`] that
//!    accepts the file (Arbin CSV exports, then any delimited text with an optional preamble).
//! 2. The service is asked whether the file is ready (`file_size` report).
//! 3. [`harvest::HarvestStateMachine`] reports metadata and a data summary, fetches the
//!    column mapping, converts the rows through [`remap::ColumnRemapper`] into Parquet
//!    partitions, uploads them and reports completion.
//!
//! [`runner::HarvestRunner`] drives this over every monitored path; [`harvest::HttpReporter`] is
//! the production transport.
//!
//! ## Quick example: one harvest pass
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use instrument_harvester::config::HarvesterSettings;
//! use instrument_harvester::detect::FormatRegistry;
//! use instrument_harvester::harvest::HttpReporter;
//! use instrument_harvester::runner::{HarvestRunner, RunnerOptions};
//!
//! # fn main() -> Result<(), instrument_harvester::HarvestError> {
//! let settings = HarvesterSettings::load(None)?;
//! let reporter = Arc::new(HttpReporter::from_settings(&settings)?);
//! let runner = HarvestRunner::new(FormatRegistry::builtin(), reporter, RunnerOptions::default())?;
//! let stats = runner.harvest_all(&settings);
//! println!("{stats}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Sniffing delimited text
//!
//! ```rust
//! use instrument_harvester::detect::DelimitedSniffer;
//!
//! let text = "Instrument: X\nOperator: Y\nt,v\n0,1.5\n1,1.6\n2,1.7\n";
//! let report = DelimitedSniffer::default().sniff(text).unwrap();
//! assert_eq!(report.dialect.delimiter, b',');
//! assert_eq!(report.preamble_lines, 2);
//! assert_eq!(report.header, vec!["t", "v"]);
//! ```
//!
//! ## Modules
//!
//! - [`types`]: raw rows, typed datasets and schemas
//! - [`metadata`]: file metadata reported before any data
//! - [`detect`]: format capabilities, the delimited-text sniffer and the dispatcher
//! - [`remap`]: column mapping, unit scaling and type coercion
//! - [`convert`]: partitioned Parquet output and the preview plot
//! - [`harvest`]: the per-file state machine, reports and the HTTP transport
//! - [`runner`]: directory walks over monitored paths
//! - [`config`], [`logging`], [`error`]

pub mod config;
pub mod convert;
pub mod detect;
pub mod error;
pub mod harvest;
pub mod logging;
pub mod metadata;
pub mod remap;
pub mod runner;
pub mod types;

pub use error::{HarvestError, HarvestResult};
