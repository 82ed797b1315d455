//! Command line configuration
//!
//! Everything here is validated before any process is touched, so a bad
//! profiler id or timeout fails without opening a single handle.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, ValueEnum};

use crate::attach::AttachPlan;
use crate::core::{AttachError, AttachTimeout, ProcessSelector, ProfilerDescriptor};

/// Attach a profiler to a running managed process
#[derive(Parser, Debug)]
#[command(name = "clr-attach", author, version, about, long_about = None)]
pub struct Cli {
    /// Process id or exact executable name of the target; omit to list installed runtimes
    pub target: Option<String>,

    /// Runtime version to attach through (e.g. v4.0.30319 or 8.0.1)
    #[arg(short, long)]
    pub runtime: Option<String>,

    /// Profiler component id (GUID)
    #[arg(long, env = "CLR_ATTACH_PROFILER_ID")]
    pub profiler_id: Option<String>,

    /// Path of the profiler library
    #[arg(long, env = "CLR_ATTACH_PROFILER_PATH")]
    pub profiler_path: Option<PathBuf>,

    /// Initialization payload passed to the profiler, as hex
    #[arg(long, conflicts_with = "payload_file")]
    pub payload_hex: Option<String>,

    /// Initialization payload passed to the profiler, read from a file
    #[arg(long)]
    pub payload_file: Option<PathBuf>,

    /// Milliseconds the target runtime waits for the profiler to initialize
    #[arg(
        short,
        long,
        env = "CLR_ATTACH_TIMEOUT",
        default_value_t = 10_000,
        allow_negative_numbers = true
    )]
    pub timeout: i64,

    /// Runtime hosting facility to go through
    #[arg(long, value_enum, default_value_t = Backend::platform_default())]
    pub backend: Backend,

    /// Skip listing loaded and installed runtimes before attaching
    #[arg(long, default_value_t = false)]
    pub no_discovery: bool,

    /// Runtime install root (diagnostics backend)
    #[arg(long, env = "DOTNET_ROOT")]
    pub dotnet_root: Option<PathBuf>,

    /// Directory holding diagnostic sockets (diagnostics backend); defaults to the temp dir
    #[arg(long, env = "CLR_ATTACH_IPC_DIR")]
    pub ipc_dir: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// CLR meta-host from mscoree.dll (Windows)
    Metahost,
    /// Diagnostic IPC port of the target runtime
    Diagnostics,
}

impl Backend {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "windows") {
            Self::Metahost
        } else {
            Self::Diagnostics
        }
    }
}

#[derive(Debug, Clone)]
pub enum Mode {
    /// No target given: print installed runtimes
    ListRuntimes,
    Attach(AttachPlan),
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct AttachConfig {
    pub mode: Mode,
    pub backend: Backend,
    pub discover: bool,
    pub dotnet_root: Option<PathBuf>,
    pub ipc_dir: PathBuf,
}

impl AttachConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, AttachError> {
        let mode = match &cli.target {
            None => Mode::ListRuntimes,
            Some(target) => Mode::Attach(plan_from(cli, target)?),
        };

        Ok(Self {
            mode,
            backend: cli.backend,
            discover: !cli.no_discovery,
            dotnet_root: cli.dotnet_root.clone(),
            ipc_dir: cli.ipc_dir.clone().unwrap_or_else(std::env::temp_dir),
        })
    }
}

fn invalid(reason: impl Into<String>) -> AttachError {
    AttachError::InvalidConfiguration {
        reason: reason.into(),
    }
}

fn plan_from(cli: &Cli, target: &str) -> Result<AttachPlan, AttachError> {
    // Cheapest checks first
    let profiler_id = cli
        .profiler_id
        .as_deref()
        .ok_or_else(|| invalid("--profiler-id is required to attach"))?;
    let component_id = ProfilerDescriptor::parse_component_id(profiler_id)?;
    let profiler_path = cli
        .profiler_path
        .as_deref()
        .ok_or_else(|| invalid("--profiler-path is required to attach"))?;
    let timeout = AttachTimeout::from_millis(cli.timeout)?;

    let target: ProcessSelector = match target.parse() {
        Ok(selector) => selector,
        Err(never) => match never {},
    };
    if matches!(&target, ProcessSelector::Name(name) if name.is_empty()) {
        return Err(invalid("target process name is empty"));
    }

    let image_path = absolute(profiler_path)?;
    let payload = read_payload(cli)?;
    let profiler = ProfilerDescriptor::new(component_id, image_path, payload)?;

    if !profiler.image_path().exists() {
        log::warn!(
            "Profiler library {} does not exist on this machine",
            profiler.image_path().display()
        );
    }

    Ok(AttachPlan {
        target,
        runtime_version: cli.runtime.clone(),
        profiler,
        timeout,
    })
}

fn read_payload(cli: &Cli) -> Result<Vec<u8>, AttachError> {
    if let Some(text) = &cli.payload_hex {
        let text = text.trim();
        let text = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        return hex::decode(text).map_err(|e| invalid(format!("bad --payload-hex: {}", e)));
    }

    if let Some(path) = &cli.payload_file {
        return fs::read(path)
            .map_err(|e| invalid(format!("cannot read payload {}: {}", path.display(), e)));
    }

    Ok(Vec::new())
}

/// The target resolves the profiler path from its own working directory
fn absolute(path: &Path) -> Result<PathBuf, AttachError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| invalid(format!("cannot resolve {}: {}", path.display(), e)))
}
