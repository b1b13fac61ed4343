//! Conversion of row streams into partitioned Parquet output plus the optional preview plot.

pub mod parquet;
pub mod partition;
pub mod plot;
pub mod scratch;

pub use partition::{ConvertedData, PartitionFile, PartitionedConverter};
pub use scratch::ScratchSpace;
