//! Runtime discovery - what is loaded in a process, what is installed.
//!
//! Both listings are informational; the attach pipeline never picks its
//! runtime version from them.

use std::fmt;

use super::{RuntimeHost, RuntimeIter};
use crate::core::{AttachError, ProcessTarget, RuntimeDescriptor};
use crate::process::ProcessHandle;

/// Runtimes active inside the target process
pub fn enumerate_loaded_runtimes<'h, H, P>(
    host: &'h H,
    target: &ProcessTarget<P>,
) -> Result<RuntimeIter<'h>, AttachError>
where
    H: RuntimeHost,
    P: ProcessHandle,
{
    log::debug!("Enumerating runtimes loaded in {}", target);
    host.loaded_runtimes(target.handle())
}

/// Runtimes installed on this machine
pub fn enumerate_installed_runtimes<H: RuntimeHost>(host: &H) -> Result<RuntimeIter<'_>, AttachError> {
    log::debug!("Enumerating installed runtimes");
    host.installed_runtimes()
}

/// Snapshot of both listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeInventory {
    pub loaded: Vec<RuntimeDescriptor>,
    pub installed: Vec<RuntimeDescriptor>,
}

impl RuntimeInventory {
    pub fn collect<H, P>(host: &H, target: &ProcessTarget<P>) -> Result<Self, AttachError>
    where
        H: RuntimeHost,
        P: ProcessHandle,
    {
        Ok(Self {
            loaded: enumerate_loaded_runtimes(host, target)?.collect(),
            installed: enumerate_installed_runtimes(host)?.collect(),
        })
    }
}

impl fmt::Display for RuntimeInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Loaded Runtimes:")?;
        for runtime in &self.loaded {
            writeln!(f, "- {}", runtime)?;
        }
        writeln!(f, "Installed Runtimes:")?;
        for runtime in &self.installed {
            writeln!(f, "- {}", runtime)?;
        }
        Ok(())
    }
}
