//! Type coercion and unit scaling of raw columns.

pub mod coerce;
pub mod mapping;

pub use mapping::{ColumnMapping, ColumnRemapper, MappingEntry, TargetKind};
