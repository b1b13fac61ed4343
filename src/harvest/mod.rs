//! The per-file harvest pipeline and its contract with the reporting service.

pub mod http;
pub mod machine;
pub mod observer;
pub mod report;

pub use http::HttpReporter;
pub use machine::{HarvestOutcome, HarvestState, HarvestStateMachine, HarvestStatus, PartitionUpload};
pub use observer::{
    CompositeObserver, FileObserver, HarvestContext, HarvestObserver, HarvestSeverity,
    TracingObserver,
};
pub use report::{Reply, Report, ReportBody, Reporter, Upload, UploadFields};
