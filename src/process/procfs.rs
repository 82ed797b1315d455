//! Process directory backed by `/proc`.
//!
//! A handle is an open descriptor on the process's `/proc/<pid>` directory.
//! Reads for an open handle go through that descriptor, so they keep seeing
//! the process instance that was opened even if its pid is reused.

use std::fs::{self, File};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use super::{ProcessDirectory, ProcessHandle};

#[derive(Debug)]
pub struct ProcfsHandle {
    pid: u32,
    dir: File,
}

impl ProcfsHandle {
    /// Path of an entry below the held directory, resolved through the descriptor
    fn entry(&self, name: &str) -> PathBuf {
        Path::new("/proc/self/fd")
            .join(self.dir.as_raw_fd().to_string())
            .join(name)
    }
}

impl ProcessHandle for ProcfsHandle {
    fn process_id(&self) -> u32 {
        self.pid
    }

    fn raw(&self) -> isize {
        self.dir.as_raw_fd() as isize
    }
}

#[derive(Debug, Clone)]
pub struct ProcfsDirectory {
    root: PathBuf,
}

impl ProcfsDirectory {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn process_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }
}

impl Default for ProcfsDirectory {
    fn default() -> Self {
        Self::with_root("/proc")
    }
}

impl ProcessDirectory for ProcfsDirectory {
    type Handle = ProcfsHandle;

    fn process_ids(&self) -> io::Result<Vec<u32>> {
        let mut pids: Vec<u32> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str()?.parse().ok())
            .collect();

        pids.sort_unstable();
        Ok(pids)
    }

    fn open(&self, pid: u32) -> io::Result<Self::Handle> {
        let dir = File::open(self.process_dir(pid))?;
        Ok(ProcfsHandle { pid, dir })
    }

    fn module_base_name(&self, handle: &Self::Handle) -> io::Result<String> {
        // `exe` needs ptrace access; `cmdline` and `comm` are world readable
        if let Some(name) = fs::read_link(handle.entry("exe")).ok().and_then(|p| base_name(&p)) {
            return Ok(name.trim_end_matches(" (deleted)").to_string());
        }

        let cmdline = fs::read(handle.entry("cmdline"))?;
        let argv0 = cmdline.split(|b| *b == 0).next().unwrap_or_default();
        if !argv0.is_empty() {
            if let Some(name) = base_name(Path::new(&*String::from_utf8_lossy(argv0))) {
                return Ok(name);
            }
        }

        // Kernel threads have no command line
        Ok(fs::read_to_string(handle.entry("comm"))?.trim_end().to_string())
    }
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
