//! Ordered-trial dispatch over format capabilities.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{HarvestError, HarvestResult, ProbeError};

use super::arbin::ArbinCsvProbe;
use super::capability::{CapabilityProbe, CapabilityProvider, FormatCapability};
use super::delimited::DelimitedProbe;

/// Selects the single capability that accepts a file.
///
/// Probes are tried in order; the fallback probe is always tried last.
pub struct FormatRegistry {
    probes: Vec<Arc<dyn CapabilityProbe>>,
    fallback: Arc<dyn CapabilityProbe>,
}

impl FormatRegistry {
    /// A registry with the given ordered probes and fallback.
    pub fn new(probes: Vec<Arc<dyn CapabilityProbe>>, fallback: Arc<dyn CapabilityProbe>) -> Self {
        Self { probes, fallback }
    }

    /// Built-in probes only: Arbin CSV, then the delimited-text fallback.
    pub fn builtin() -> Self {
        Self::new(vec![Arc::new(ArbinCsvProbe)], Arc::new(DelimitedProbe::default()))
    }

    /// Built-in probes preceded by every probe the providers supply, in provider order.
    ///
    /// A provider that fails is logged and skipped.
    pub fn discover(providers: &[&dyn CapabilityProvider]) -> Self {
        let mut registry = Self::builtin();
        let mut external = Vec::new();
        for provider in providers {
            match provider.probes() {
                Ok(probes) => {
                    debug!(provider = provider.name(), count = probes.len(), "loaded capabilities");
                    external.extend(probes);
                }
                Err(e) => {
                    error!(provider = provider.name(), error = %e, "failed to load capabilities");
                }
            }
        }
        external.append(&mut registry.probes);
        registry.probes = external;
        registry
    }

    /// Append a probe just before the fallback.
    pub fn push(&mut self, probe: Arc<dyn CapabilityProbe>) {
        self.probes.push(probe);
    }

    /// Probe names in trial order, fallback included.
    pub fn names(&self) -> Vec<&str> {
        self.probes
            .iter()
            .chain(std::iter::once(&self.fallback))
            .map(|p| p.name())
            .collect()
    }

    /// Bind the first capability that accepts `path`.
    pub fn dispatch(&self, path: &Path) -> HarvestResult<Box<dyn FormatCapability>> {
        for probe in self.probes.iter().chain(std::iter::once(&self.fallback)) {
            match probe.probe(path) {
                Ok(capability) => {
                    debug!(path = %path.display(), capability = probe.name(), "capability accepted file");
                    return Ok(capability);
                }
                Err(ProbeError::NotApplicable { reason }) => {
                    debug!(path = %path.display(), capability = probe.name(), %reason, "not applicable");
                }
                Err(ProbeError::Failed(e)) if e.is_unsupported() => {
                    debug!(path = %path.display(), capability = probe.name(), error = %e, "not applicable");
                }
                Err(ProbeError::Failed(e)) => {
                    error!(
                        path = %path.display(),
                        capability = probe.name(),
                        kind = e.kind(),
                        error = %e,
                        "capability failed while probing; trying next"
                    );
                }
            }
        }
        Err(HarvestError::UnsupportedFormat {
            path: path.to_path_buf(),
        })
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("probes", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FileMetadata;
    use crate::types::ColumnInfo;
    use crate::detect::capability::RowIter;

    struct Broken;

    impl CapabilityProbe for Broken {
        fn name(&self) -> &str {
            "Broken"
        }

        fn probe(&self, _path: &Path) -> Result<Box<dyn FormatCapability>, ProbeError> {
            Err(ProbeError::Failed(HarvestError::Capability {
                capability: "Broken".into(),
                message: "bug".into(),
            }))
        }
    }

    struct Fixed(ColumnInfo);

    impl FormatCapability for Fixed {
        fn name(&self) -> &str {
            "Fixed"
        }
        fn column_info(&self) -> &ColumnInfo {
            &self.0
        }
        fn metadata(&self) -> HarvestResult<FileMetadata> {
            Ok(FileMetadata::default())
        }
        fn rows(&self, _columns: &[String]) -> HarvestResult<RowIter<'_>> {
            Ok(Box::new(std::iter::empty()))
        }
    }

    struct ByExtension(&'static str);

    impl CapabilityProbe for ByExtension {
        fn name(&self) -> &str {
            self.0
        }

        fn probe(&self, path: &Path) -> Result<Box<dyn FormatCapability>, ProbeError> {
            if path.extension().is_some_and(|e| e == self.0) {
                Ok(Box::new(Fixed(ColumnInfo::default())))
            } else {
                Err(ProbeError::not_applicable("extension"))
            }
        }
    }

    struct Provider(bool);

    impl CapabilityProvider for Provider {
        fn name(&self) -> &str {
            "test"
        }

        fn probes(&self) -> HarvestResult<Vec<Arc<dyn CapabilityProbe>>> {
            if self.0 {
                Ok(vec![Arc::new(Broken), Arc::new(ByExtension("mpr"))])
            } else {
                Err(HarvestError::Config {
                    message: "cannot load".into(),
                })
            }
        }
    }

    #[test]
    fn discovered_probes_precede_builtins_and_failures_are_skipped() {
        let good = Provider(true);
        let bad = Provider(false);
        let registry = FormatRegistry::discover(&[&bad, &good]);
        assert_eq!(registry.names(), vec!["Broken", "mpr", "ArbinCsv", "Delimited"]);
    }

    #[test]
    fn failing_probe_does_not_block_later_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.mpr");
        std::fs::write(&path, [0u8, 159, 146, 150]).unwrap();

        let registry = FormatRegistry::discover(&[&Provider(true)]);
        let cap = registry.dispatch(&path).unwrap();
        assert_eq!(cap.name(), "Fixed");
    }

    #[test]
    fn nothing_accepting_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0xffu8, 0xfe, 0x00, 0x81, 0x0a, 0x00]).unwrap();

        let err = FormatRegistry::builtin().dispatch(&path).unwrap_err();
        assert!(matches!(err, HarvestError::UnsupportedFormat { .. }));
        assert!(err.is_unsupported());
    }
}
