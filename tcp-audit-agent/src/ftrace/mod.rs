//! The ftrace-backed event source.
//!
//! On construction this source locates tracefs, creates a tracing
//! instance of its own, enables the socket state tracepoint inside it,
//! and opens the instance's trace pipe. Reading multiplexes the
//! (nonblocking) pipe with an internal wake pipe via `poll(2)`, so a
//! reader blocked waiting for kernel records is released the moment the
//! source is closed.

pub mod parse;
pub mod tracefs;

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use log::info;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tcp_audit_types::Event;
use thiserror::Error;

use crate::source::{Closeable, Eventer};
use parse::{ParseError, ParsedLine};
use tracefs::TracingInstance;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("tracefs not mounted")]
    TracefsNotMounted,
    #[error("required tracepoint not available")]
    TracepointUnavailable,
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        source: io::Error,
    },
    #[error("trace pipe returned unexpected EOF")]
    UnexpectedEof,
    #[error("trace pipe closed")]
    Closed,
    #[error("creating event from trace pipe: {0}")]
    Parse(#[from] ParseError),
}

impl SourceError {
    fn io(context: &'static str, source: io::Error) -> SourceError {
        SourceError::Io { context, source }
    }
}

/// Plugin-style constructor for the ftrace event source.
pub fn new_eventer() -> Result<Box<dyn Eventer>> {
    let source = FtraceEventSource::new().context("initialising ftrace event source")?;
    Ok(Box::new(source))
}

/// Event source reading the socket state tracepoint of a private tracing
/// instance.
pub struct FtraceEventSource {
    state: Mutex<PipeState>,
    /// Write end of the wake pipe; a single byte releases a blocked reader.
    wake_tx: File,
    closed: AtomicBool,
}

struct PipeState {
    pipe: Option<File>,
    wake_rx: Option<OwnedFd>,
    instance: Option<TracingInstance>,
    buf: Vec<u8>,
}

impl FtraceEventSource {
    /// Discover tracefs and bring up a tracing instance of our own.
    pub fn new() -> Result<FtraceEventSource, SourceError> {
        let mountpoint = tracefs::mountpoint()?;
        FtraceEventSource::with_mountpoint(&mountpoint)
    }

    fn with_mountpoint(mountpoint: &std::path::Path) -> Result<FtraceEventSource, SourceError> {
        let tracepoint = tracefs::select_tracepoint(mountpoint)?;
        info!("using tracepoint {tracepoint}");

        // Dropping the instance on any early return below removes the
        // half-built directory again.
        let instance = TracingInstance::create(mountpoint)?;
        instance.enable_tracing()?;
        instance.enable_tracepoint(tracepoint)?;
        let pipe = instance.open_trace_pipe(tracepoint)?;
        info!("created tracing instance {}", instance.path().display());

        let (wake_rx, wake_tx) = nix::unistd::pipe()
            .map_err(|errno| SourceError::io("creating wake pipe", errno.into()))?;

        Ok(FtraceEventSource {
            state: Mutex::new(PipeState {
                pipe: Some(pipe),
                wake_rx: Some(wake_rx),
                instance: Some(instance),
                buf: Vec::new(),
            }),
            wake_tx: File::from(wake_tx),
            closed: AtomicBool::new(false),
        })
    }

    /// Block until a full line is available on the trace pipe.
    fn read_line(&self) -> Result<String, SourceError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *state;
        let mut chunk = [0u8; 4096];

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(SourceError::Closed);
            }

            if let Some(idx) = state.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buf.drain(..=idx).collect();
                return Ok(String::from_utf8_lossy(&line[..idx]).into_owned());
            }

            let (Some(pipe), Some(wake_rx)) = (&state.pipe, &state.wake_rx) else {
                return Err(SourceError::Closed);
            };

            let mut fds = [
                PollFd::new(pipe.as_fd(), PollFlags::POLLIN),
                PollFd::new(wake_rx.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(SourceError::io("polling trace pipe", errno.into())),
            }
            if fds[1].revents().is_some_and(|revents| !revents.is_empty()) {
                // Woken by close().
                return Err(SourceError::Closed);
            }

            let mut reader: &File = pipe;
            match reader.read(&mut chunk) {
                Ok(0) => return Err(SourceError::UnexpectedEof),
                Ok(n) => state.buf.extend_from_slice(&chunk[..n]),
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::Interrupted =>
                {
                    continue
                }
                Err(err) => return Err(SourceError::io("reading trace pipe", err)),
            }
        }
    }

    #[cfg(test)]
    fn for_pipe(pipe: File) -> FtraceEventSource {
        let (wake_rx, wake_tx) = nix::unistd::pipe().unwrap();
        FtraceEventSource {
            state: Mutex::new(PipeState {
                pipe: Some(pipe),
                wake_rx: Some(wake_rx),
                instance: None,
                buf: Vec::new(),
            }),
            wake_tx: File::from(wake_tx),
            closed: AtomicBool::new(false),
        }
    }
}

impl Eventer for FtraceEventSource {
    fn next_event(&self) -> Result<Event> {
        loop {
            let line = self.read_line().context("scanning trace pipe for event")?;
            if line.is_empty() {
                continue;
            }

            match parse::parse_line(&line).map_err(SourceError::from)? {
                ParsedLine::Event(event) => return Ok(event),
                ParsedLine::Irrelevant => continue,
            }
        }
    }

    fn as_closeable(&self) -> Option<&dyn Closeable> {
        Some(self)
    }
}

impl Closeable for FtraceEventSource {
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Release any reader parked in poll() so it can observe the flag,
        // then tear down: pipe first, instance directory second.
        let _ = (&self.wake_tx).write_all(b"1");
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pipe = None;
        state.wake_rx = None;
        state.instance = None;

        Ok(())
    }
}
