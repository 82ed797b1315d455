//! In-memory process directory and hosting facility used by unit tests.
//!
//! Both fakes count their calls, and the directory tracks how many of its
//! handles are still alive.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io;
use std::rc::Rc;

use uuid::Uuid;

use crate::core::{AttachError, AttachRequest, HResult, RuntimeDescriptor};
use crate::process::{ProcessDirectory, ProcessHandle};
use crate::runtime::{AttachCapability, RuntimeHost, RuntimeInfo, RuntimeIter};

#[derive(Debug, Clone)]
enum FakeProcess {
    Named(String),
    Denied,
    Nameless,
}

#[derive(Debug)]
pub struct FakeHandle {
    pid: u32,
    live: Rc<Cell<usize>>,
}

impl ProcessHandle for FakeHandle {
    fn process_id(&self) -> u32 {
        self.pid
    }

    fn raw(&self) -> isize {
        self.pid as isize
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

#[derive(Debug, Default)]
pub struct FakeDirectory {
    processes: BTreeMap<u32, FakeProcess>,
    live: Rc<Cell<usize>>,
    list_calls: Cell<usize>,
    open_calls: Cell<usize>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_process(mut self, pid: u32, name: &str) -> Self {
        self.processes.insert(pid, FakeProcess::Named(name.to_string()));
        self
    }

    /// A process that refuses to be opened
    pub fn with_denied(mut self, pid: u32, _name: &str) -> Self {
        self.processes.insert(pid, FakeProcess::Denied);
        self
    }

    /// A process that opens but whose module name can't be read
    pub fn with_nameless(mut self, pid: u32) -> Self {
        self.processes.insert(pid, FakeProcess::Nameless);
        self
    }

    pub fn open_handles(&self) -> usize {
        self.live.get()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.get()
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.get()
    }
}

impl ProcessDirectory for FakeDirectory {
    type Handle = FakeHandle;

    fn process_ids(&self) -> io::Result<Vec<u32>> {
        self.list_calls.set(self.list_calls.get() + 1);
        Ok(self.processes.keys().copied().collect())
    }

    fn open(&self, pid: u32) -> io::Result<Self::Handle> {
        self.open_calls.set(self.open_calls.get() + 1);
        match self.processes.get(&pid) {
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
            Some(FakeProcess::Denied) => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
            Some(_) => {
                self.live.set(self.live.get() + 1);
                Ok(FakeHandle {
                    pid,
                    live: Rc::clone(&self.live),
                })
            }
        }
    }

    fn module_base_name(&self, handle: &Self::Handle) -> io::Result<String> {
        match self.processes.get(&handle.pid) {
            Some(FakeProcess::Named(name)) => Ok(name.clone()),
            _ => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
        }
    }
}

/// What a fake attach call received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAttach {
    pub process_id: u32,
    pub runtime_version: String,
    pub timeout_ms: u32,
    pub component_id: Uuid,
    pub image_path: String,
    pub init_payload: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct HostCalls {
    pub discovery: Cell<usize>,
    pub lookups: Cell<usize>,
    pub loadable_checks: Cell<usize>,
    pub capability_requests: Cell<usize>,
    pub attaches: RefCell<Vec<RecordedAttach>>,
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

#[derive(Debug, Clone, Copy)]
struct FakeRuntimeSpec {
    loadable: bool,
    has_capability: bool,
}

pub struct FakeHost {
    available: bool,
    loaded: Vec<String>,
    installed: Vec<RuntimeDescriptor>,
    runtimes: BTreeMap<String, FakeRuntimeSpec>,
    default_version: Option<String>,
    status: HResult,
    calls: Rc<HostCalls>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            available: true,
            loaded: Vec::new(),
            installed: Vec::new(),
            runtimes: BTreeMap::new(),
            default_version: None,
            status: HResult::S_OK,
            calls: Rc::new(HostCalls::default()),
        }
    }

    /// Discovery fails as if the hosting library could not be loaded
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_loaded(mut self, version: &str) -> Self {
        self.loaded.push(version.to_string());
        self
    }

    pub fn with_installed(mut self, version: &str, loadable: bool) -> Self {
        self.installed.push(RuntimeDescriptor::new(version, loadable));
        self
    }

    pub fn with_runtime(mut self, version: &str, loadable: bool, has_capability: bool) -> Self {
        self.runtimes.insert(
            version.to_string(),
            FakeRuntimeSpec {
                loadable,
                has_capability,
            },
        );
        self
    }

    pub fn with_default_version(mut self, version: &str) -> Self {
        self.default_version = Some(version.to_string());
        self
    }

    /// Status every attach call returns
    pub fn with_attach_status(mut self, status: HResult) -> Self {
        self.status = status;
        self
    }

    pub fn calls(&self) -> &HostCalls {
        &self.calls
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeHost for FakeHost {
    type Runtime = FakeRuntime;

    fn loaded_runtimes(&self, _process: &dyn ProcessHandle) -> Result<RuntimeIter<'_>, AttachError> {
        bump(&self.calls.discovery);
        if !self.available {
            return Err(AttachError::DiscoveryUnavailable {
                reason: "fake hosting library missing".into(),
            });
        }
        Ok(Box::new(
            self.loaded.iter().map(|v| RuntimeDescriptor::new(v.clone(), true)),
        ))
    }

    fn installed_runtimes(&self) -> Result<RuntimeIter<'_>, AttachError> {
        bump(&self.calls.discovery);
        if !self.available {
            return Err(AttachError::DiscoveryUnavailable {
                reason: "fake hosting library missing".into(),
            });
        }
        Ok(Box::new(self.installed.iter().cloned()))
    }

    fn runtime(&self, version: &str) -> Result<Self::Runtime, AttachError> {
        bump(&self.calls.lookups);
        let spec = self
            .runtimes
            .get(version)
            .ok_or_else(|| AttachError::LookupFailed {
                version: version.to_string(),
                reason: "unknown version".into(),
            })?;

        Ok(FakeRuntime {
            version: version.to_string(),
            spec: *spec,
            status: self.status,
            calls: Rc::clone(&self.calls),
        })
    }

    fn default_version(&self) -> Option<String> {
        self.default_version.clone()
    }
}

pub struct FakeRuntime {
    version: String,
    spec: FakeRuntimeSpec,
    status: HResult,
    calls: Rc<HostCalls>,
}

impl RuntimeInfo for FakeRuntime {
    type Capability = FakeCapability;

    fn version(&self) -> &str {
        &self.version
    }

    fn is_loadable(&self) -> Result<bool, AttachError> {
        bump(&self.calls.loadable_checks);
        Ok(self.spec.loadable)
    }

    fn attach_capability(&self) -> Result<Self::Capability, AttachError> {
        bump(&self.calls.capability_requests);
        if !self.spec.has_capability {
            return Err(AttachError::InterfaceUnavailable {
                version: self.version.clone(),
                reason: "no profiling interface".into(),
            });
        }
        Ok(FakeCapability {
            status: self.status,
            calls: Rc::clone(&self.calls),
        })
    }
}

pub struct FakeCapability {
    status: HResult,
    calls: Rc<HostCalls>,
}

impl AttachCapability for FakeCapability {
    fn attach_profiler(&self, request: &AttachRequest<'_>) -> HResult {
        self.calls.attaches.borrow_mut().push(RecordedAttach {
            process_id: request.process_id,
            runtime_version: request.runtime_version.to_string(),
            timeout_ms: request.timeout.as_millis(),
            component_id: request.profiler.component_id(),
            image_path: request.profiler.image_path().display().to_string(),
            init_payload: request.profiler.init_payload().to_vec(),
        });
        self.status
    }
}
