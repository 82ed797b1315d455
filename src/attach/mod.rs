//! Attach orchestrator
//!
//! A single-pass, fail-fast state machine:
//!
//! ```text
//! START -> PROCESS_RESOLVED -> RUNTIME_SELECTED -> RUNTIME_VALIDATED
//!       -> CAPABILITY_ACQUIRED -> ATTACH_ISSUED -> ATTACHED | FAILED
//! ```
//!
//! Each state owns whatever the previous steps acquired, so the process
//! handle is released on every exit path, including early failures.
//! Nothing is retried.

use std::cell::{Cell, OnceCell};
use std::fmt;

use crate::core::{
    AttachError, AttachRequest, AttachTimeout, HResult, ProcessSelector, ProcessTarget,
    ProfilerDescriptor,
};
use crate::process::{self, ProcessDirectory, ProcessHandle};
use crate::runtime::{
    AttachCapability, CapabilityOf, RuntimeHost, RuntimeInspector, RuntimeInventory,
};

#[cfg(test)]
mod tests;

/// Observable orchestration states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Start,
    ProcessResolved,
    RuntimeSelected,
    RuntimeValidated,
    CapabilityAcquired,
    AttachIssued,
    Attached,
    Failed,
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::ProcessResolved => "PROCESS_RESOLVED",
            Self::RuntimeSelected => "RUNTIME_SELECTED",
            Self::RuntimeValidated => "RUNTIME_VALIDATED",
            Self::CapabilityAcquired => "CAPABILITY_ACQUIRED",
            Self::AttachIssued => "ATTACH_ISSUED",
            Self::Attached => "ATTACHED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Hooks called while the state machine runs
pub trait AttachObserver {
    fn transition(&mut self, _from: AttachState, _to: AttachState) {}

    fn runtimes_discovered(&mut self, _inventory: &RuntimeInventory) {}
}

impl AttachObserver for () {}

/// Everything the caller decides up front
#[derive(Debug, Clone)]
pub struct AttachPlan {
    pub target: ProcessSelector,
    /// `None` takes the hosting facility's default
    pub runtime_version: Option<String>,
    pub profiler: ProfilerDescriptor,
    pub timeout: AttachTimeout,
}

/// Result of an accepted attach request.
///
/// The profiler may still be initializing inside the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attached {
    pub process_id: u32,
    pub executable_name: String,
    pub runtime_version: String,
    pub status: HResult,
}

enum State<P, C> {
    Start,
    ProcessResolved {
        target: ProcessTarget<P>,
    },
    RuntimeSelected {
        target: ProcessTarget<P>,
        version: String,
    },
    RuntimeValidated {
        target: ProcessTarget<P>,
        version: String,
    },
    CapabilityAcquired {
        target: ProcessTarget<P>,
        version: String,
        capability: C,
    },
    AttachIssued {
        target: ProcessTarget<P>,
        version: String,
        status: HResult,
    },
    Attached(Attached),
}

impl<P, C> State<P, C> {
    fn kind(&self) -> AttachState {
        match self {
            Self::Start => AttachState::Start,
            Self::ProcessResolved { .. } => AttachState::ProcessResolved,
            Self::RuntimeSelected { .. } => AttachState::RuntimeSelected,
            Self::RuntimeValidated { .. } => AttachState::RuntimeValidated,
            Self::CapabilityAcquired { .. } => AttachState::CapabilityAcquired,
            Self::AttachIssued { .. } => AttachState::AttachIssued,
            Self::Attached(_) => AttachState::Attached,
        }
    }
}

type Connect<'a, H> = Box<dyn FnOnce() -> Result<H, AttachError> + 'a>;

enum Facility<'a, H> {
    Borrowed(&'a H),
    /// Built the first time it is needed, after the target process resolved
    Deferred {
        connect: Cell<Option<Connect<'a, H>>>,
        host: OnceCell<H>,
    },
}

/// Drives one attach attempt against an explicit process directory and
/// hosting facility
pub struct Orchestrator<'a, D, H> {
    directory: &'a D,
    facility: Facility<'a, H>,
    discover: bool,
}

impl<'a, D, H> Orchestrator<'a, D, H>
where
    D: ProcessDirectory,
    H: RuntimeHost,
{
    pub fn new(directory: &'a D, host: &'a H) -> Self {
        Self {
            directory,
            facility: Facility::Borrowed(host),
            discover: true,
        }
    }

    /// Like [`Orchestrator::new`], but the hosting facility is only built by
    /// `connect` once the target process is resolved. A missing process is
    /// then reported as such even where no facility can be set up.
    pub fn deferred<F>(directory: &'a D, connect: F) -> Self
    where
        F: FnOnce() -> Result<H, AttachError> + 'a,
    {
        Self {
            directory,
            facility: Facility::Deferred {
                connect: Cell::new(Some(Box::new(connect))),
                host: OnceCell::new(),
            },
            discover: true,
        }
    }

    /// Whether to list loaded and installed runtimes once the process is resolved
    pub fn with_discovery(mut self, discover: bool) -> Self {
        self.discover = discover;
        self
    }

    pub fn run(&self, plan: &AttachPlan) -> Result<Attached, AttachError> {
        self.run_with(plan, &mut ())
    }

    pub fn run_with<O: AttachObserver>(
        &self,
        plan: &AttachPlan,
        observer: &mut O,
    ) -> Result<Attached, AttachError> {
        let mut state = State::Start;

        loop {
            let from = state.kind();

            match self.step(state, plan, observer) {
                Ok(State::Attached(attached)) => {
                    log::debug!("{} -> {}", from, AttachState::Attached);
                    observer.transition(from, AttachState::Attached);
                    log::info!(
                        "Attach request accepted by {} (PID {}) on runtime {}",
                        attached.executable_name,
                        attached.process_id,
                        attached.runtime_version
                    );
                    return Ok(attached);
                }
                Ok(next) => {
                    log::debug!("{} -> {}", from, next.kind());
                    observer.transition(from, next.kind());
                    state = next;
                }
                Err(e) => {
                    log::debug!("{} -> {} ({})", from, AttachState::Failed, e);
                    observer.transition(from, AttachState::Failed);
                    return Err(e);
                }
            }
        }
    }

    fn host(&self) -> Result<&H, AttachError> {
        match &self.facility {
            Facility::Borrowed(host) => Ok(*host),
            Facility::Deferred { connect, host } => {
                if let Some(host) = host.get() {
                    return Ok(host);
                }

                let connect = connect.take().ok_or_else(|| AttachError::DiscoveryUnavailable {
                    reason: "runtime hosting facility failed to initialize".into(),
                })?;
                log::debug!("Initializing runtime hosting facility");
                let built = connect()?;
                Ok(host.get_or_init(|| built))
            }
        }
    }

    fn step<O: AttachObserver>(
        &self,
        state: State<D::Handle, CapabilityOf<H>>,
        plan: &AttachPlan,
        observer: &mut O,
    ) -> Result<State<D::Handle, CapabilityOf<H>>, AttachError> {
        match state {
            State::Start => {
                let target = process::resolve(self.directory, &plan.target)?;
                Ok(State::ProcessResolved { target })
            }

            State::ProcessResolved { target } => {
                let host = self.host()?;

                if self.discover {
                    let inventory = RuntimeInventory::collect(host, &target)?;
                    log::info!("Runtimes for {}:\n{}", target, inventory);
                    observer.runtimes_discovered(&inventory);
                }

                // Not negotiated from discovery: the version may not be loaded yet
                let version = match &plan.runtime_version {
                    Some(version) => version.clone(),
                    None => host.default_version().ok_or_else(|| {
                        AttachError::InvalidConfiguration {
                            reason: "no runtime version given and the hosting facility has no default"
                                .into(),
                        }
                    })?,
                };

                Ok(State::RuntimeSelected { target, version })
            }

            State::RuntimeSelected { target, version } => {
                if !RuntimeInspector::new(self.host()?).is_loadable(&version)? {
                    return Err(AttachError::RuntimeNotLoadable { version });
                }
                Ok(State::RuntimeValidated { target, version })
            }

            State::RuntimeValidated { target, version } => {
                let capability =
                    RuntimeInspector::new(self.host()?).resolve_attach_interface(&version)?;
                Ok(State::CapabilityAcquired {
                    target,
                    version,
                    capability,
                })
            }

            State::CapabilityAcquired {
                target,
                version,
                capability,
            } => {
                let request = AttachRequest {
                    process_id: target.handle().process_id(),
                    runtime_version: &version,
                    profiler: &plan.profiler,
                    timeout: plan.timeout,
                };

                log::debug!(
                    "Attaching profiler {} ({}) to PID {} with timeout {}",
                    plan.profiler.component_id().braced(),
                    plan.profiler.image_path().display(),
                    request.process_id,
                    request.timeout
                );
                let status = capability.attach_profiler(&request);

                Ok(State::AttachIssued {
                    target,
                    version,
                    status,
                })
            }

            State::AttachIssued {
                target,
                version,
                status,
            } => {
                let process_id = target.handle().process_id();
                if !status.is_success() {
                    return Err(AttachError::AttachRejected {
                        pid: process_id,
                        status,
                    });
                }

                Ok(State::Attached(Attached {
                    process_id,
                    executable_name: target.executable_name().to_string(),
                    runtime_version: version,
                    status,
                }))
            }

            State::Attached(attached) => Ok(State::Attached(attached)),
        }
    }
}
