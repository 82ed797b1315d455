//! Diagnostic IPC backend
//!
//! Talks to the diagnostic port that modern runtimes (3.0 and later) open
//! in every process, and reads installed runtimes from the shared framework
//! directory of a dotnet root.

pub mod endpoint;
pub mod protocol;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{AttachCapability, RuntimeHost, RuntimeInfo, RuntimeIter};
use crate::core::{AttachError, AttachRequest, HResult, RuntimeDescriptor};
use crate::process::ProcessHandle;

pub use endpoint::EndpointLocator;
use protocol::{IpcMessage, ProcessInfo, Response};

/// First major version with profiler attach over the diagnostic port
pub const MIN_ATTACH_MAJOR: u32 = 3;

const SHARED_FRAMEWORK: &str = "shared/Microsoft.NETCore.App";

/// Grace period on top of the attach timeout before giving up on a reply
const REPLY_GRACE: Duration = Duration::from_secs(5);

/// Well-known install locations, probed in order
pub fn default_dotnet_root() -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &[r"C:\Program Files\dotnet"]
    } else if cfg!(target_os = "macos") {
        &["/usr/local/share/dotnet"]
    } else {
        &["/usr/share/dotnet", "/usr/lib/dotnet", "/usr/local/share/dotnet"]
    };

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.join(SHARED_FRAMEWORK).is_dir())
}

/// `8.0.1`, `v4.0.30319`, `9.0.0-preview.3` -> numeric components
fn parse_version(version: &str) -> Option<Vec<u32>> {
    let core = version.trim().trim_start_matches('v');
    let core = core.split(['-', '+']).next()?;

    core.split('.').map(|part| part.parse().ok()).collect()
}

#[derive(Debug, Clone)]
pub struct DiagnosticsHost {
    endpoints: EndpointLocator,
    dotnet_root: Option<PathBuf>,
}

impl DiagnosticsHost {
    pub fn new(ipc_dir: impl Into<PathBuf>, dotnet_root: Option<PathBuf>) -> Result<Self, AttachError> {
        let endpoints = EndpointLocator::new(ipc_dir);

        if cfg!(unix) && !endpoints.ipc_dir().is_dir() {
            return Err(AttachError::DiscoveryUnavailable {
                reason: format!(
                    "diagnostic IPC directory {} does not exist",
                    endpoints.ipc_dir().display()
                ),
            });
        }

        let dotnet_root = dotnet_root.or_else(default_dotnet_root);
        match &dotnet_root {
            Some(root) => log::debug!("Using dotnet root {}", root.display()),
            None => log::warn!("No dotnet root found; installed runtimes unknown"),
        }

        Ok(Self {
            endpoints,
            dotnet_root,
        })
    }

    /// Installed shared framework versions, oldest first
    fn installed_versions(&self) -> Vec<String> {
        let Some(root) = &self.dotnet_root else {
            return Vec::new();
        };

        let entries = match fs::read_dir(root.join(SHARED_FRAMEWORK)) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Cannot read shared framework under {}: {}", root.display(), e);
                return Vec::new();
            }
        };

        let mut versions: Vec<(Vec<u32>, String)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                Some((parse_version(&name)?, name))
            })
            .collect();

        versions.sort();
        versions.into_iter().map(|(_, name)| name).collect()
    }

    fn is_installed(&self, version: &str) -> bool {
        match &self.dotnet_root {
            Some(root) => runtime_dir(root, version).is_dir(),
            None => false,
        }
    }

    /// Ask the target's runtime which version it is
    pub fn process_info(&self, pid: u32) -> io::Result<ProcessInfo> {
        let mut stream = self.endpoints.connect(pid, Some(REPLY_GRACE))?;
        protocol::process_info().write_to(&mut stream)?;

        match Response::from_message(IpcMessage::read_from(&mut stream)?)? {
            Response::Ok(payload) => ProcessInfo::parse(&payload),
            Response::Error(status) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("ProcessInfo rejected with status {}", status),
            )),
        }
    }
}

fn runtime_dir(root: &Path, version: &str) -> PathBuf {
    root.join(SHARED_FRAMEWORK).join(version.trim_start_matches('v'))
}

impl RuntimeHost for DiagnosticsHost {
    type Runtime = DiagnosticsRuntime;

    fn loaded_runtimes(&self, process: &dyn ProcessHandle) -> Result<RuntimeIter<'_>, AttachError> {
        let pid = process.process_id();

        match self.process_info(pid) {
            Ok(info) => {
                log::debug!("PID {} runs {} on {}/{}", pid, info.clr_product_version, info.os, info.arch);
                let descriptor = RuntimeDescriptor::new(info.runtime_version(), true);
                Ok(Box::new(std::iter::once(descriptor)))
            }
            // No diagnostic port: nothing modern is loaded
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("{}", e);
                Ok(Box::new(std::iter::empty()))
            }
            Err(e) => Err(AttachError::DiscoveryUnavailable {
                reason: format!("diagnostic port of PID {}: {}", pid, e),
            }),
        }
    }

    fn installed_runtimes(&self) -> Result<RuntimeIter<'_>, AttachError> {
        Ok(Box::new(
            self.installed_versions()
                .into_iter()
                .map(|v| RuntimeDescriptor::new(v, true)),
        ))
    }

    fn runtime(&self, version: &str) -> Result<Self::Runtime, AttachError> {
        let components = parse_version(version).ok_or_else(|| AttachError::LookupFailed {
            version: version.to_string(),
            reason: "not a dotted numeric version".into(),
        })?;

        Ok(DiagnosticsRuntime {
            version: version.to_string(),
            major: components.first().copied().unwrap_or(0),
            installed: self.is_installed(version),
            endpoints: self.endpoints.clone(),
        })
    }

    fn default_version(&self) -> Option<String> {
        self.installed_versions().pop()
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticsRuntime {
    version: String,
    major: u32,
    installed: bool,
    endpoints: EndpointLocator,
}

impl RuntimeInfo for DiagnosticsRuntime {
    type Capability = DiagnosticsCapability;

    fn version(&self) -> &str {
        &self.version
    }

    fn is_loadable(&self) -> Result<bool, AttachError> {
        Ok(self.installed)
    }

    fn attach_capability(&self) -> Result<Self::Capability, AttachError> {
        if self.major < MIN_ATTACH_MAJOR {
            return Err(AttachError::InterfaceUnavailable {
                version: self.version.clone(),
                reason: format!(
                    "profiler attach over the diagnostic port needs version {}.0 or later",
                    MIN_ATTACH_MAJOR
                ),
            });
        }

        Ok(DiagnosticsCapability {
            endpoints: self.endpoints.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticsCapability {
    endpoints: EndpointLocator,
}

impl DiagnosticsCapability {
    fn send(&self, request: &AttachRequest<'_>) -> io::Result<Response> {
        let message = protocol::attach_profiler(request)?;
        let wait = Duration::from_millis(u64::from(request.timeout.as_millis())) + REPLY_GRACE;

        let mut stream = self.endpoints.connect(request.process_id, Some(wait))?;
        message.write_to(&mut stream)?;
        Response::from_message(IpcMessage::read_from(&mut stream)?)
    }
}

impl AttachCapability for DiagnosticsCapability {
    fn attach_profiler(&self, request: &AttachRequest<'_>) -> HResult {
        match self.send(request) {
            Ok(response) => response.status(),
            Err(e) => {
                log::warn!("Diagnostic IPC with PID {} failed: {}", request.process_id, e);
                match e.kind() {
                    io::ErrorKind::InvalidInput => HResult::E_INVALIDARG,
                    io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                        HResult::E_UNEXPECTED
                    }
                    _ => HResult::from_io(&e),
                }
            }
        }
    }
}
