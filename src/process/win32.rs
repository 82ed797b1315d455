//! Process directory using the Windows process status API.

use std::io;

use windows::Win32::Foundation::{CloseHandle, HANDLE, MAX_PATH};
use windows::Win32::System::ProcessStatus::{EnumProcesses, GetModuleBaseNameW};
use windows::Win32::System::Threading::{GetProcessId, OpenProcess, PROCESS_ALL_ACCESS};

use super::{ProcessDirectory, ProcessHandle};

/// Process handle closed on drop
#[derive(Debug)]
pub struct OwnedProcessHandle(HANDLE);

impl OwnedProcessHandle {
    pub fn as_raw(&self) -> HANDLE {
        self.0
    }
}

impl ProcessHandle for OwnedProcessHandle {
    fn process_id(&self) -> u32 {
        unsafe { GetProcessId(self.0) }
    }

    fn raw(&self) -> isize {
        self.0 .0
    }
}

impl Drop for OwnedProcessHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// The local machine's process table
#[derive(Debug, Default)]
pub struct Win32Directory;

impl ProcessDirectory for Win32Directory {
    type Handle = OwnedProcessHandle;

    fn process_ids(&self) -> io::Result<Vec<u32>> {
        let mut pids: Vec<u32> = vec![0; 1024];

        loop {
            let capacity = (pids.len() * std::mem::size_of::<u32>()) as u32;
            let mut bytes_returned: u32 = 0;

            unsafe {
                EnumProcesses(pids.as_mut_ptr(), capacity, &mut bytes_returned)
                    .map_err(to_io_error)?;
            }

            // A full buffer may mean the list was truncated
            if bytes_returned < capacity {
                pids.truncate(bytes_returned as usize / std::mem::size_of::<u32>());
                return Ok(pids);
            }
            pids.resize(pids.len() * 2, 0);
        }
    }

    fn open(&self, pid: u32) -> io::Result<Self::Handle> {
        let handle =
            unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid) }.map_err(to_io_error)?;
        Ok(OwnedProcessHandle(handle))
    }

    fn module_base_name(&self, handle: &Self::Handle) -> io::Result<String> {
        let mut name_buf = [0u16; MAX_PATH as usize];

        let len = unsafe { GetModuleBaseNameW(handle.0, None, &mut name_buf) };
        if len == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(String::from_utf16_lossy(&name_buf[..len as usize]))
    }
}

fn to_io_error(e: windows::core::Error) -> io::Error {
    io::Error::from_raw_os_error(e.code().0 & 0xFFFF)
}
