//! Runtime info inspector - per-version attachability checks.

use super::{CapabilityOf, RuntimeHost, RuntimeInfo};
use crate::core::AttachError;

pub struct RuntimeInspector<'h, H> {
    host: &'h H,
}

impl<'h, H: RuntimeHost> RuntimeInspector<'h, H> {
    pub fn new(host: &'h H) -> Self {
        Self { host }
    }

    /// Whether `version` can currently be loaded into a process
    pub fn is_loadable(&self, version: &str) -> Result<bool, AttachError> {
        let runtime = self.host.runtime(version)?;
        let loadable = runtime.is_loadable()?;

        log::debug!("Runtime {} loadable: {}", runtime.version(), loadable);
        Ok(loadable)
    }

    /// The attach capability of `version`. Older runtimes have none.
    pub fn resolve_attach_interface(&self, version: &str) -> Result<CapabilityOf<H>, AttachError> {
        self.host.runtime(version)?.attach_capability()
    }
}
