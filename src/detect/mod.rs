//! Format detection: the capability contract, the built-in capabilities and the dispatcher.

pub mod arbin;
pub mod capability;
pub mod delimited;
pub mod registry;
pub mod sniffer;

pub use arbin::ArbinCsvProbe;
pub use capability::{CapabilityProbe, CapabilityProvider, FormatCapability, RowIter};
pub use delimited::{DelimitedCapability, DelimitedProbe};
pub use registry::FormatRegistry;
pub use sniffer::{DelimitedSniffer, Dialect, SniffReport};
