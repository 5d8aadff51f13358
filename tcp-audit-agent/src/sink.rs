//! The sinker contract, its plugin loader, and the built-in stdout sinker.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tcp_audit_types::Event;

use crate::plugin::PluginHandle;
use crate::source::Closeable;

/// Consumes one event at a time.
///
/// A failed delivery is non-fatal on its own; the processor drops the
/// event and counts the failure toward its consecutive-error bound.
pub trait Sinker: Send + Sync {
    fn sink(&self, event: &Event) -> Result<()>;

    /// The close capability, if this sinker owns releasable resources.
    fn as_closeable(&self) -> Option<&dyn Closeable> {
        None
    }
}

/// Constructor signature a sinker plugin must export.
pub type SinkerConstructor = fn() -> Result<Box<dyn Sinker>>;

/// Loads a sinker from a plugin handle's constructor symbol.
pub struct SinkerLoader<'a> {
    handle: &'a dyn PluginHandle,
}

impl<'a> SinkerLoader<'a> {
    pub fn new(handle: &'a dyn PluginHandle) -> SinkerLoader<'a> {
        SinkerLoader { handle }
    }

    pub fn load(&self) -> Result<Box<dyn Sinker>> {
        let symbol = self.handle.load().context("loading sinker plugin")?;
        let Ok(constructor) = symbol.downcast::<SinkerConstructor>() else {
            bail!("sinker plugin constructor has incorrect signature");
        };
        constructor()
    }
}

// ---------------------------------------------------------------------------
// Stdout sinker
// ---------------------------------------------------------------------------

/// Serialized view of one event, one NDJSON line per transition.
#[derive(Serialize)]
struct EventRecord<'a> {
    timestamp: String,
    pid_on_cpu: i32,
    command_on_cpu: &'a str,
    src_ip: String,
    src_port: u16,
    dst_ip: String,
    dst_port: u16,
    old_state: &'static str,
    new_state: &'static str,
}

impl<'a> From<&'a Event> for EventRecord<'a> {
    fn from(event: &'a Event) -> EventRecord<'a> {
        EventRecord {
            timestamp: format_timestamp(event.time),
            pid_on_cpu: event.pid_on_cpu,
            command_on_cpu: &event.command_on_cpu,
            src_ip: event.source_ip.to_string(),
            src_port: event.source_port,
            dst_ip: event.dest_ip.to_string(),
            dst_port: event.dest_port,
            old_state: event.old_state.as_str(),
            new_state: event.new_state.as_str(),
        }
    }
}

/// Built-in sinker writing one JSON record per event to stdout.
pub struct StdoutSinker;

/// Plugin-style constructor for the stdout sinker.
pub fn new_stdout_sinker() -> Result<Box<dyn Sinker>> {
    Ok(Box::new(StdoutSinker))
}

impl Sinker for StdoutSinker {
    fn sink(&self, event: &Event) -> Result<()> {
        let json =
            serde_json::to_string(&EventRecord::from(event)).context("serializing event record")?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{json}").context("writing event record")
    }

    fn as_closeable(&self) -> Option<&dyn Closeable> {
        Some(self)
    }
}

impl Closeable for StdoutSinker {
    fn close(&self) -> Result<()> {
        std::io::stdout().lock().flush().context("flushing stdout")
    }
}

fn format_timestamp(time: SystemTime) -> String {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since_epoch.as_secs();
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    let millis = since_epoch.subsec_millis();

    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}
