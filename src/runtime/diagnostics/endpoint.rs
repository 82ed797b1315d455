//! Locating and connecting to a process's diagnostic port.
//!
//! Unix: `<ipc dir>/dotnet-diagnostic-<pid>-<key>-socket`, where the key is
//! the runtime's start timestamp; the most recently modified socket wins.
//! Windows: the named pipe `\\.\pipe\dotnet-diagnostic-<pid>`.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
pub type IpcStream = std::os::unix::net::UnixStream;

#[cfg(windows)]
pub type IpcStream = std::fs::File;

#[derive(Debug, Clone)]
pub struct EndpointLocator {
    ipc_dir: PathBuf,
}

impl EndpointLocator {
    pub fn new(ipc_dir: impl Into<PathBuf>) -> Self {
        Self {
            ipc_dir: ipc_dir.into(),
        }
    }

    pub fn ipc_dir(&self) -> &Path {
        &self.ipc_dir
    }

    /// Path of the diagnostic endpoint of `pid`
    #[cfg(unix)]
    pub fn locate(&self, pid: u32) -> io::Result<PathBuf> {
        let prefix = format!("dotnet-diagnostic-{}-", pid);

        std::fs::read_dir(&self.ipc_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with(&prefix) && name.ends_with("-socket")
            })
            .filter_map(|e| {
                let modified = e.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, e.path()))
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, path)| path)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no diagnostic socket for PID {} in {}", pid, self.ipc_dir.display()),
                )
            })
    }

    #[cfg(windows)]
    pub fn locate(&self, pid: u32) -> io::Result<PathBuf> {
        Ok(PathBuf::from(format!(r"\\.\pipe\dotnet-diagnostic-{}", pid)))
    }

    /// Open a fresh connection; the runtime serves one command per connection
    #[cfg(unix)]
    pub fn connect(&self, pid: u32, read_timeout: Option<Duration>) -> io::Result<IpcStream> {
        let path = self.locate(pid)?;
        log::debug!("Connecting to diagnostic socket {}", path.display());

        let stream = IpcStream::connect(&path)?;
        stream.set_read_timeout(read_timeout)?;
        Ok(stream)
    }

    #[cfg(windows)]
    pub fn connect(&self, pid: u32, _read_timeout: Option<Duration>) -> io::Result<IpcStream> {
        let path = self.locate(pid)?;
        log::debug!("Connecting to diagnostic pipe {}", path.display());

        std::fs::OpenOptions::new().read(true).write(true).open(path)
    }
}
