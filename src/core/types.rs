//! Common types for the attach pipeline.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use uuid::Uuid;

use super::error::AttachError;

/// How the caller names the process to attach to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessSelector {
    /// Numeric process identifier
    Id(u32),
    /// Exact, case-sensitive executable base name (e.g. `Worker.exe`)
    Name(String),
}

impl FromStr for ProcessSelector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.parse::<u32>() {
            Ok(pid) => Self::Id(pid),
            Err(_) => Self::Name(s.to_string()),
        })
    }
}

impl fmt::Display for ProcessSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(pid) => write!(f, "PID {}", pid),
            Self::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// A process resolved by the process directory.
///
/// Owns the platform handle; dropping the target releases it.
#[derive(Debug)]
pub struct ProcessTarget<H> {
    process_id: u32,
    executable_name: String,
    handle: H,
}

impl<H> ProcessTarget<H> {
    pub fn new(process_id: u32, executable_name: impl Into<String>, handle: H) -> Self {
        Self {
            process_id,
            executable_name: executable_name.into(),
            handle,
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn executable_name(&self) -> &str {
        &self.executable_name
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}

impl<H> fmt::Display for ProcessTarget<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (PID {})", self.executable_name, self.process_id)
    }
}

/// A runtime environment found loaded in a process or installed on the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDescriptor {
    /// Version string as reported by the hosting facility (e.g. `v4.0.30319`)
    pub version: String,
    /// Whether the runtime can currently be loaded into a process
    pub loadable: bool,
}

impl RuntimeDescriptor {
    pub fn new(version: impl Into<String>, loadable: bool) -> Self {
        Self {
            version: version.into(),
            loadable,
        }
    }
}

impl fmt::Display for RuntimeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.loadable {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{} (not loadable)", self.version)
        }
    }
}

/// Identity of the profiler component handed to the runtime.
///
/// The component itself is opaque; only its identifier, image path and
/// initialization payload travel downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerDescriptor {
    component_id: Uuid,
    image_path: PathBuf,
    init_payload: Vec<u8>,
}

impl ProfilerDescriptor {
    /// Build a descriptor from a textual component identifier.
    ///
    /// Accepts the hyphenated form with or without braces, e.g.
    /// `{BD097ED8-733E-43FE-8ED7-A95FF9A8448C}`.
    pub fn parse(
        component_id: &str,
        image_path: impl Into<PathBuf>,
        init_payload: Vec<u8>,
    ) -> Result<Self, AttachError> {
        Self::new(Self::parse_component_id(component_id)?, image_path, init_payload)
    }

    pub fn parse_component_id(text: &str) -> Result<Uuid, AttachError> {
        Uuid::parse_str(text.trim()).map_err(|e| AttachError::InvalidConfiguration {
            reason: format!("malformed profiler id '{}': {}", text, e),
        })
    }

    pub fn new(
        component_id: Uuid,
        image_path: impl Into<PathBuf>,
        init_payload: Vec<u8>,
    ) -> Result<Self, AttachError> {
        if u32::try_from(init_payload.len()).is_err() {
            return Err(AttachError::InvalidConfiguration {
                reason: format!("init payload of {} bytes is too large", init_payload.len()),
            });
        }

        Ok(Self {
            component_id,
            image_path: image_path.into(),
            init_payload,
        })
    }

    pub fn component_id(&self) -> Uuid {
        self.component_id
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn init_payload(&self) -> &[u8] {
        &self.init_payload
    }

    pub fn init_payload_len(&self) -> u32 {
        // Bounded at construction
        self.init_payload.len() as u32
    }
}

/// How long the target runtime waits for the profiler to initialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachTimeout(u32);

impl AttachTimeout {
    pub const DEFAULT: Self = Self(10_000);

    pub fn from_millis(millis: i64) -> Result<Self, AttachError> {
        match u32::try_from(millis) {
            Ok(ms) if ms > 0 => Ok(Self(ms)),
            _ => Err(AttachError::InvalidConfiguration {
                reason: format!(
                    "timeout must be between 1 and {} milliseconds, got {}",
                    u32::MAX,
                    millis
                ),
            }),
        }
    }

    pub fn as_millis(&self) -> u32 {
        self.0
    }
}

impl Default for AttachTimeout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for AttachTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A single attach call, built once the attach capability is in hand
#[derive(Debug, Clone, Copy)]
pub struct AttachRequest<'a> {
    pub process_id: u32,
    pub runtime_version: &'a str,
    pub profiler: &'a ProfilerDescriptor,
    pub timeout: AttachTimeout,
}

/// 32-bit status code returned by the hosting facility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: Self = Self(0);
    pub const E_FAIL: Self = Self(0x8000_4005_u32 as i32);
    pub const E_INVALIDARG: Self = Self(0x8007_0057_u32 as i32);
    pub const E_UNEXPECTED: Self = Self(0x8000_FFFF_u32 as i32);

    pub fn is_success(&self) -> bool {
        self.0 >= 0
    }

    /// `HRESULT_FROM_WIN32`
    pub fn from_win32(code: u32) -> Self {
        if code == 0 {
            Self::S_OK
        } else {
            Self(((code & 0xFFFF) | 0x8007_0000) as i32)
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) if code > 0 => Self::from_win32(code as u32),
            _ => Self::E_FAIL,
        }
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}
