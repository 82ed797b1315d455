//! CLR meta-host backend (Windows)
//!
//! Loads `mscoree.dll`, resolves `CLRCreateInstance` and walks the
//! meta-host -> runtime-info -> profiling object graph over COM.

#![allow(non_snake_case)]

use std::ffi::c_void;
use std::ptr;

use windows::core::{
    interface, s, w, IUnknown, IUnknown_Vtbl, Interface, GUID, HRESULT, HSTRING, PCSTR, PCWSTR,
    PWSTR,
};
use windows::Win32::Foundation::{BOOL, HANDLE, HMODULE, S_OK};
use windows::Win32::System::Com::IEnumUnknown;
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

use super::{AttachCapability, RuntimeHost, RuntimeInfo, RuntimeIter};
use crate::core::{AttachError, AttachRequest, HResult, RuntimeDescriptor};
use crate::process::ProcessHandle;

const CLSID_CLR_META_HOST: GUID = GUID::from_u128(0x9280188d_0e8e_4867_b30c_7fa83884e8de);
const CLSID_CLR_PROFILING: GUID = GUID::from_u128(0xbd097ed8_733e_43fe_8ed7_a95ff9a8448c);

/// The version every CLR 4 based framework reports
pub const DEFAULT_VERSION: &str = "v4.0.30319";

type CreateInstanceFn =
    unsafe extern "system" fn(clsid: *const GUID, riid: *const GUID, out: *mut *mut c_void) -> HRESULT;

#[interface("D332DB9E-B9B3-4125-8207-A14884F53216")]
unsafe trait ICLRMetaHost: IUnknown {
    fn GetRuntime(&self, version: PCWSTR, riid: *const GUID, runtime: *mut *mut c_void) -> HRESULT;
    fn GetVersionFromFile(&self, path: PCWSTR, buffer: PWSTR, len: *mut u32) -> HRESULT;
    fn EnumerateInstalledRuntimes(&self, enumerator: *mut *mut c_void) -> HRESULT;
    fn EnumerateLoadedRuntimes(&self, process: HANDLE, enumerator: *mut *mut c_void) -> HRESULT;
    fn RequestRuntimeLoadedNotification(&self, callback: *mut c_void) -> HRESULT;
    fn QueryLegacyV2RuntimeBinding(&self, riid: *const GUID, unk: *mut *mut c_void) -> HRESULT;
    fn ExitProcess(&self, exit_code: i32) -> HRESULT;
}

#[interface("BD39D1D2-BA2F-486A-89B0-B4B0CB466891")]
unsafe trait ICLRRuntimeInfo: IUnknown {
    fn GetVersionString(&self, buffer: PWSTR, len: *mut u32) -> HRESULT;
    fn GetRuntimeDirectory(&self, buffer: PWSTR, len: *mut u32) -> HRESULT;
    fn IsLoaded(&self, process: HANDLE, loaded: *mut BOOL) -> HRESULT;
    fn LoadErrorString(&self, id: u32, buffer: PWSTR, len: *mut u32, locale: i32) -> HRESULT;
    fn LoadLibrary(&self, name: PCWSTR, module: *mut HMODULE) -> HRESULT;
    fn GetProcAddress(&self, name: PCSTR, proc: *mut *mut c_void) -> HRESULT;
    fn GetInterface(&self, clsid: *const GUID, riid: *const GUID, out: *mut *mut c_void) -> HRESULT;
    fn IsLoadable(&self, loadable: *mut BOOL) -> HRESULT;
    fn SetDefaultStartupFlags(&self, flags: u32, config: PCWSTR) -> HRESULT;
    fn GetDefaultStartupFlags(&self, flags: *mut u32, config: PWSTR, len: *mut u32) -> HRESULT;
    fn BindAsLegacyV2Runtime(&self) -> HRESULT;
    fn IsStarted(&self, started: *mut BOOL, flags: *mut u32) -> HRESULT;
}

#[interface("B349ABE3-B56F-4689-BFCD-76BF39D888EA")]
unsafe trait ICLRProfiling: IUnknown {
    fn AttachProfiler(
        &self,
        pid: u32,
        timeout_ms: u32,
        profiler: *const GUID,
        path: PCWSTR,
        client_data: *const c_void,
        client_data_len: u32,
    ) -> HRESULT;
}

/// The meta-host. One per invocation; `mscoree.dll` stays loaded for the
/// lifetime of the process.
pub struct MetaHost {
    inner: ICLRMetaHost,
}

impl MetaHost {
    pub fn new() -> Result<Self, AttachError> {
        let unavailable = |reason: String| AttachError::DiscoveryUnavailable { reason };

        let module = unsafe { LoadLibraryW(w!("mscoree.dll")) }
            .map_err(|e| unavailable(format!("mscoree.dll: {}", e)))?;

        let entry = unsafe { GetProcAddress(module, s!("CLRCreateInstance")) }
            .ok_or_else(|| unavailable("mscoree.dll exports no CLRCreateInstance".into()))?;
        let create: CreateInstanceFn = unsafe { std::mem::transmute(entry) };

        let mut raw = ptr::null_mut();
        unsafe { create(&CLSID_CLR_META_HOST, &ICLRMetaHost::IID, &mut raw) }
            .ok()
            .map_err(|e| unavailable(format!("CLRCreateInstance: {}", e)))?;

        log::debug!("CLR meta-host created");
        Ok(Self {
            inner: unsafe { ICLRMetaHost::from_raw(raw) },
        })
    }
}

fn version_string(info: &ICLRRuntimeInfo) -> windows::core::Result<String> {
    let mut buf = [0u16; 256];
    let mut len = buf.len() as u32;

    unsafe { info.GetVersionString(PWSTR(buf.as_mut_ptr()), &mut len) }.ok()?;

    // `len` counts the terminating NUL
    let len = (len as usize).saturating_sub(1).min(buf.len());
    Ok(String::from_utf16_lossy(&buf[..len]))
}

fn is_loadable(info: &ICLRRuntimeInfo) -> windows::core::Result<bool> {
    let mut loadable = BOOL(0);
    unsafe { info.IsLoadable(&mut loadable) }.ok()?;
    Ok(loadable.as_bool())
}

/// Walk an `IEnumUnknown` of runtime infos lazily
fn runtimes_from(enumerator: IEnumUnknown) -> RuntimeIter<'static> {
    Box::new(std::iter::from_fn(move || loop {
        let mut items = [None];
        if unsafe { enumerator.Next(&mut items, None) } != S_OK {
            return None;
        }

        let Some(unknown) = items[0].take() else {
            return None;
        };

        let info = match unknown.cast::<ICLRRuntimeInfo>() {
            Ok(info) => info,
            Err(e) => {
                log::warn!("Enumerated object is not a runtime info: {}", e);
                continue;
            }
        };

        match version_string(&info) {
            Ok(version) => {
                let loadable = is_loadable(&info).unwrap_or(false);
                return Some(RuntimeDescriptor::new(version, loadable));
            }
            Err(e) => log::warn!("Failed to read runtime version: {}", e),
        }
    }))
}

impl RuntimeHost for MetaHost {
    type Runtime = ClrRuntime;

    fn loaded_runtimes(&self, process: &dyn ProcessHandle) -> Result<RuntimeIter<'_>, AttachError> {
        let mut raw = ptr::null_mut();
        unsafe { self.inner.EnumerateLoadedRuntimes(HANDLE(process.raw()), &mut raw) }
            .ok()
            .map_err(|e| AttachError::DiscoveryUnavailable {
                reason: format!("EnumerateLoadedRuntimes: {}", e),
            })?;

        Ok(runtimes_from(unsafe { IEnumUnknown::from_raw(raw) }))
    }

    fn installed_runtimes(&self) -> Result<RuntimeIter<'_>, AttachError> {
        let mut raw = ptr::null_mut();
        unsafe { self.inner.EnumerateInstalledRuntimes(&mut raw) }
            .ok()
            .map_err(|e| AttachError::DiscoveryUnavailable {
                reason: format!("EnumerateInstalledRuntimes: {}", e),
            })?;

        Ok(runtimes_from(unsafe { IEnumUnknown::from_raw(raw) }))
    }

    fn runtime(&self, version: &str) -> Result<Self::Runtime, AttachError> {
        let wide = HSTRING::from(version);
        let mut raw = ptr::null_mut();

        unsafe {
            self.inner
                .GetRuntime(PCWSTR(wide.as_ptr()), &ICLRRuntimeInfo::IID, &mut raw)
        }
        .ok()
        .map_err(|e| AttachError::LookupFailed {
            version: version.to_string(),
            reason: e.to_string(),
        })?;

        Ok(ClrRuntime {
            version: version.to_string(),
            info: unsafe { ICLRRuntimeInfo::from_raw(raw) },
        })
    }

    fn default_version(&self) -> Option<String> {
        Some(DEFAULT_VERSION.to_string())
    }
}

pub struct ClrRuntime {
    version: String,
    info: ICLRRuntimeInfo,
}

impl RuntimeInfo for ClrRuntime {
    type Capability = ClrProfiling;

    fn version(&self) -> &str {
        &self.version
    }

    fn is_loadable(&self) -> Result<bool, AttachError> {
        is_loadable(&self.info).map_err(|e| AttachError::LookupFailed {
            version: self.version.clone(),
            reason: format!("IsLoadable: {}", e),
        })
    }

    fn attach_capability(&self) -> Result<Self::Capability, AttachError> {
        let mut raw = ptr::null_mut();

        unsafe {
            self.info
                .GetInterface(&CLSID_CLR_PROFILING, &ICLRProfiling::IID, &mut raw)
        }
        .ok()
        .map_err(|e| AttachError::InterfaceUnavailable {
            version: self.version.clone(),
            reason: e.to_string(),
        })?;

        Ok(ClrProfiling {
            inner: unsafe { ICLRProfiling::from_raw(raw) },
        })
    }
}

pub struct ClrProfiling {
    inner: ICLRProfiling,
}

impl AttachCapability for ClrProfiling {
    fn attach_profiler(&self, request: &AttachRequest<'_>) -> HResult {
        let profiler = request.profiler;
        let clsid = GUID::from_u128(profiler.component_id().as_u128());
        let path = HSTRING::from(profiler.image_path().to_string_lossy().as_ref());

        let payload = profiler.init_payload();
        let client_data = if payload.is_empty() {
            ptr::null()
        } else {
            payload.as_ptr() as *const c_void
        };

        let hr = unsafe {
            self.inner.AttachProfiler(
                request.process_id,
                request.timeout.as_millis(),
                &clsid,
                PCWSTR(path.as_ptr()),
                client_data,
                profiler.init_payload_len(),
            )
        };

        HResult(hr.0)
    }
}
