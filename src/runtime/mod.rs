//! Runtime module - Access to the machine's runtime-hosting facility.
//!
//! The facility is an explicitly constructed value implementing
//! [`RuntimeHost`]. Two backends are provided:
//! - `metahost`: the CLR meta-host exposed by `mscoree.dll` (Windows)
//! - `diagnostics`: the diagnostic IPC port of modern runtimes

pub mod diagnostics;
pub mod discovery;
pub mod inspect;

#[cfg(target_os = "windows")]
pub mod metahost;

use crate::core::{AttachError, AttachRequest, HResult, RuntimeDescriptor};
use crate::process::ProcessHandle;

pub use discovery::{enumerate_installed_runtimes, enumerate_loaded_runtimes, RuntimeInventory};
pub use inspect::RuntimeInspector;

/// Lazy, single-pass sequence of discovered runtimes
pub type RuntimeIter<'a> = Box<dyn Iterator<Item = RuntimeDescriptor> + 'a>;

/// Attach capability handed out by a host's runtime
pub type CapabilityOf<H> = <<H as RuntimeHost>::Runtime as RuntimeInfo>::Capability;

/// Machine-level service that knows which runtimes exist and brokers attach requests
pub trait RuntimeHost {
    type Runtime: RuntimeInfo;

    /// Runtimes currently active inside the given process
    fn loaded_runtimes(&self, process: &dyn ProcessHandle) -> Result<RuntimeIter<'_>, AttachError>;

    /// Runtimes installed on the local machine
    fn installed_runtimes(&self) -> Result<RuntimeIter<'_>, AttachError>;

    /// Resolve a specific runtime version
    fn runtime(&self, version: &str) -> Result<Self::Runtime, AttachError>;

    /// Version used when the caller does not name one
    fn default_version(&self) -> Option<String>;
}

/// A single runtime version as seen by the hosting facility
pub trait RuntimeInfo {
    type Capability: AttachCapability;

    fn version(&self) -> &str;

    /// Whether this runtime can currently be loaded into a process
    fn is_loadable(&self) -> Result<bool, AttachError>;

    /// The object through which attach requests are issued
    fn attach_capability(&self) -> Result<Self::Capability, AttachError>;
}

/// Issues profiler attach requests against a running process.
///
/// A success status only means the request was accepted; the profiler
/// initializes asynchronously inside the target.
pub trait AttachCapability {
    fn attach_profiler(&self, request: &AttachRequest<'_>) -> HResult;
}
