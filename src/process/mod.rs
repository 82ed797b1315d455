//! Process directory - resolves the target process to an owned handle.
//!
//! Resolution is either by numeric id or by a full scan of the running
//! processes for an exact executable base name match. Handles are RAII
//! values: whatever is opened and not returned is closed before the scan
//! moves on.

use std::io;

use crate::core::{AttachError, ProcessSelector, ProcessTarget};

#[cfg(target_os = "windows")]
mod win32;

#[cfg(target_os = "linux")]
mod procfs;

#[cfg(target_os = "windows")]
pub use win32::{OwnedProcessHandle, Win32Directory as PlatformDirectory};

#[cfg(target_os = "linux")]
pub use procfs::{ProcfsDirectory as PlatformDirectory, ProcfsHandle};

/// An open process handle. Closed when dropped.
pub trait ProcessHandle {
    /// Numeric identifier of the process behind this handle
    fn process_id(&self) -> u32;

    /// Raw OS handle value, for hosting facilities that take one
    fn raw(&self) -> isize;
}

/// Black-box access to the operating system's process table
pub trait ProcessDirectory {
    type Handle: ProcessHandle;

    /// List the identifiers of all running processes
    fn process_ids(&self) -> io::Result<Vec<u32>>;

    /// Open a process with full access rights
    fn open(&self, pid: u32) -> io::Result<Self::Handle>;

    /// Base name of the process's primary module
    fn module_base_name(&self, handle: &Self::Handle) -> io::Result<String>;
}

/// Resolve a target by id or name
pub fn resolve<D: ProcessDirectory>(
    directory: &D,
    selector: &ProcessSelector,
) -> Result<ProcessTarget<D::Handle>, AttachError> {
    match selector {
        ProcessSelector::Id(pid) => resolve_by_id(directory, *pid),
        ProcessSelector::Name(name) => resolve_by_name(directory, name),
    }
}

/// Open a process by its identifier
pub fn resolve_by_id<D: ProcessDirectory>(
    directory: &D,
    pid: u32,
) -> Result<ProcessTarget<D::Handle>, AttachError> {
    let handle = directory.open(pid).map_err(|e| AttachError::NotFound {
        target: format!("PID {} ({})", pid, e),
    })?;

    let name = directory
        .module_base_name(&handle)
        .unwrap_or_else(|_| format!("<PID {}>", pid));

    log::debug!("Opened process {} ({})", pid, name);
    Ok(ProcessTarget::new(pid, name, handle))
}

/// Scan all running processes for one whose module base name is exactly `name`
pub fn resolve_by_name<D: ProcessDirectory>(
    directory: &D,
    name: &str,
) -> Result<ProcessTarget<D::Handle>, AttachError> {
    let pids = directory.process_ids().map_err(|e| AttachError::NotFound {
        target: format!("'{}' (process list unavailable: {})", name, e),
    })?;

    log::debug!("Scanning {} processes for '{}'", pids.len(), name);

    for pid in pids {
        if pid == 0 {
            continue;
        }

        // Skip processes we can't access
        let handle = match directory.open(pid) {
            Ok(h) => h,
            Err(e) => {
                log::trace!("Skipping PID {}: {}", pid, e);
                continue;
            }
        };

        let candidate = match directory.module_base_name(&handle) {
            Ok(n) => n,
            Err(e) => {
                log::trace!("Skipping PID {}: no module name ({})", pid, e);
                continue;
            }
        };

        if candidate == name {
            log::debug!("Matched '{}' to PID {}", name, pid);
            return Ok(ProcessTarget::new(pid, candidate, handle));
        }
    }

    Err(AttachError::NotFound {
        target: format!("'{}'", name),
    })
}
