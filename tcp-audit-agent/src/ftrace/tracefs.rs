//! Tracefs discovery and tracing-instance lifecycle.

use std::fmt;
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use log::warn;
use uuid::Uuid;

use super::SourceError;

const PROC_MOUNTS: &str = "/proc/mounts";

/// The kernel tracepoint driving the event stream.
///
/// The selection fixes the record schema: the legacy `tcp_set_state`
/// tracepoint emits the same tagged fields minus `family` and `protocol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracepoint {
    /// `sock/inet_sock_set_state`, available since Linux 4.16.
    InetSockSetState,
    /// `tcp/tcp_set_state`, the pre-4.16 fallback.
    TcpSetState,
}

impl Tracepoint {
    /// Path of the tracepoint relative to an `events/` directory.
    pub fn rel_path(self) -> &'static str {
        match self {
            Tracepoint::InetSockSetState => "sock/inet_sock_set_state",
            Tracepoint::TcpSetState => "tcp/tcp_set_state",
        }
    }
}

impl fmt::Display for Tracepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rel_path())
    }
}

/// Locate the tracefs mountpoint by scanning `/proc/mounts`.
pub fn mountpoint() -> Result<PathBuf, SourceError> {
    let mounts =
        File::open(PROC_MOUNTS).map_err(|err| SourceError::io("opening mounts", err))?;
    mountpoint_from(BufReader::new(mounts))
}

fn mountpoint_from(mounts: impl BufRead) -> Result<PathBuf, SourceError> {
    for line in mounts.lines() {
        let line = line
            .map_err(|err| SourceError::io("scanning mounts for tracefs mountpoint", err))?;
        let mut fields = line.split_whitespace();
        if fields.next() == Some("tracefs") {
            if let Some(mountpoint) = fields.next() {
                return Ok(PathBuf::from(mountpoint));
            }
        }
    }

    Err(SourceError::TracefsNotMounted)
}

/// Select the newest state-transition tracepoint available under the
/// given mountpoint.
pub fn select_tracepoint(mountpoint: &Path) -> Result<Tracepoint, SourceError> {
    for tracepoint in [Tracepoint::InetSockSetState, Tracepoint::TcpSetState] {
        let probe = mountpoint.join("events").join(tracepoint.rel_path());
        match fs::metadata(&probe) {
            Ok(_) => return Ok(tracepoint),
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(SourceError::io("checking tracepoint availability", err)),
        }
    }

    Err(SourceError::TracepointUnavailable)
}

/// A private tracing instance under `<tracefs>/instances/`.
///
/// Creating the directory makes the kernel allocate a dedicated ring
/// buffer and event controls; removing it releases them. The directory is
/// removed on drop, so a half-constructed event source unwinds its
/// instance without further bookkeeping.
pub struct TracingInstance {
    path: PathBuf,
}

impl TracingInstance {
    pub fn create(mountpoint: &Path) -> Result<TracingInstance, SourceError> {
        let path = mountpoint
            .join("instances")
            .join(format!("tcp-audit-{}", Uuid::new_v4()));
        // Tracefs imposes its own permissions; 0600 is what we ask for.
        DirBuilder::new()
            .mode(0o600)
            .create(&path)
            .map_err(|err| SourceError::io("making instance directory", err))?;

        Ok(TracingInstance { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Turn on the instance-wide tracing switch.
    pub fn enable_tracing(&self) -> Result<(), SourceError> {
        write_control(&self.path.join("tracing_on"))
            .map_err(|err| SourceError::io("turning tracing on", err))
    }

    /// Enable the given tracepoint within this instance.
    pub fn enable_tracepoint(&self, tracepoint: Tracepoint) -> Result<(), SourceError> {
        let enable = self
            .path
            .join("events")
            .join(tracepoint.rel_path())
            .join("enable");
        write_control(&enable).map_err(|err| SourceError::io("enabling tracepoint", err))
    }

    /// Open this instance's trace pipe for nonblocking reads.
    pub fn open_trace_pipe(&self, tracepoint: Tracepoint) -> Result<File, SourceError> {
        let pipe = self
            .path
            .join("events")
            .join(tracepoint.rel_path())
            .join("trace_pipe");
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(pipe)
            .map_err(|err| SourceError::io("opening trace pipe", err))
    }
}

/// Write `"1"` to a tracefs control file. The kernel populates these when
/// the instance directory is made; they are opened in place, never created.
fn write_control(path: &Path) -> io::Result<()> {
    use std::io::Write;

    let mut control = OpenOptions::new().write(true).open(path)?;
    control.write_all(b"1")
}

impl Drop for TracingInstance {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir(&self.path) {
            warn!("removing tracing instance {}: {err}", self.path.display());
        }
    }
}
