//! Attach errors
//!
//! Every failure in the pipeline is terminal. Each variant knows which
//! stage produced it so the final message can name it without tracing.

use std::fmt;

use thiserror::Error;

use super::types::HResult;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    ProcessResolution,
    RuntimeDiscovery,
    RuntimeValidation,
    CapabilityAcquisition,
    Attach,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::ProcessResolution => "process resolution",
            Self::RuntimeDiscovery => "runtime discovery",
            Self::RuntimeValidation => "runtime validation",
            Self::CapabilityAcquisition => "attach capability",
            Self::Attach => "attach",
        };
        f.write_str(name)
    }
}

/// Attach pipeline errors
#[derive(Error, Debug)]
pub enum AttachError {
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("process not found: {target}")]
    NotFound { target: String },

    #[error("runtime hosting facility unavailable: {reason}")]
    DiscoveryUnavailable { reason: String },

    #[error("failed to look up runtime {version}: {reason}")]
    LookupFailed { version: String, reason: String },

    #[error("runtime {version} is not loadable")]
    RuntimeNotLoadable { version: String },

    #[error("runtime {version} exposes no attach capability: {reason}")]
    InterfaceUnavailable { version: String, reason: String },

    #[error("attach to process {pid} rejected with status {status}")]
    AttachRejected { pid: u32, status: HResult },
}

impl AttachError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidConfiguration { .. } => Stage::Configuration,
            Self::NotFound { .. } => Stage::ProcessResolution,
            Self::DiscoveryUnavailable { .. } => Stage::RuntimeDiscovery,
            Self::LookupFailed { .. } | Self::RuntimeNotLoadable { .. } => {
                Stage::RuntimeValidation
            }
            Self::InterfaceUnavailable { .. } => Stage::CapabilityAcquisition,
            Self::AttachRejected { .. } => Stage::Attach,
        }
    }

    /// Underlying status code, when the hosting facility reported one
    pub fn status(&self) -> Option<HResult> {
        match self {
            Self::AttachRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}
