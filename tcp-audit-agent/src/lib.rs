//! Host-level TCP connection auditing agent.
//!
//! tcp-audit watches every TCP socket state transition the kernel makes
//! and forwards each one, as a structured event, to a pluggable sink. The
//! event source is the kernel tracing filesystem: the agent creates a
//! tracing instance of its own, enables the socket state tracepoint
//! inside it, and parses the resulting trace-pipe records.
//!
//! The pipeline tolerates transient eventer and sinker failures up to a
//! consecutive-error bound, and `SIGINT`/`SIGTERM` drive an orderly
//! shutdown that releases the tracing instance on every exit path.
//!
//! # Usage
//!
//! ```no_run
//! use tcp_audit_agent::{run_agent, AgentConfig};
//!
//! # async fn example() {
//! let config = AgentConfig {
//!     eventer_plugin: "ftrace".into(),
//!     sinker_plugin: "stdout".into(),
//!     max_consecutive_errors: 5,
//! };
//! let status = run_agent(config).await;
//! std::process::exit(i32::from(status.code()));
//! # }
//! ```

pub mod cleaner;
pub mod ftrace;
pub mod plugin;
pub mod processor;
pub mod runner;
pub mod signal;
pub mod sink;
pub mod source;
#[cfg(test)]
pub(crate) mod testutil;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::error;

use cleaner::Cleaner;
use plugin::{BuiltinPluginHandle, PluginHandle};
use processor::EventProcessor;
pub use runner::ExitStatus;
use sink::{Sinker, SinkerLoader};
use source::{Eventer, EventerLoader};

/// Configuration for the auditing agent.
pub struct AgentConfig {
    /// Path handed to the eventer plugin loader.
    pub eventer_plugin: PathBuf,
    /// Path handed to the sinker plugin loader.
    pub sinker_plugin: PathBuf,
    /// Back-to-back event or sink errors tolerated before giving up.
    pub max_consecutive_errors: u32,
}

/// Bring up the pipeline and run it until a signal or a fatal error.
pub async fn run_agent(config: AgentConfig) -> ExitStatus {
    let (pending_signal, done) = match signal::install(&[libc::SIGINT, libc::SIGTERM]) {
        Ok(handles) => handles,
        Err(err) => {
            error!("installing signal handler: {err}");
            return ExitStatus::Errored;
        }
    };

    let mut cleaner = Cleaner::new();
    let eventer_handle = BuiltinPluginHandle::new(&config.eventer_plugin);
    let sinker_handle = BuiltinPluginHandle::new(&config.sinker_plugin);
    let (eventer, sinker) = match load_pipeline(&eventer_handle, &sinker_handle, &mut cleaner) {
        Ok(endpoints) => endpoints,
        Err(err) => {
            error!("{err:#}");
            return ExitStatus::Errored;
        }
    };

    let mut processor =
        EventProcessor::new(eventer, sinker, config.max_consecutive_errors, done);
    runner::run(&mut processor, &mut cleaner, pending_signal).await
}

/// Construct the eventer, then the sinker, registering each with the
/// cleaner as it comes up. A sinker failure tears the eventer down again
/// before the error is returned.
fn load_pipeline(
    eventer_handle: &dyn PluginHandle,
    sinker_handle: &dyn PluginHandle,
    cleaner: &mut Cleaner,
) -> Result<(Arc<dyn Eventer>, Arc<dyn Sinker>)> {
    let eventer: Arc<dyn Eventer> = Arc::from(
        EventerLoader::new(eventer_handle)
            .load()
            .context("initialising eventer")?,
    );
    cleaner.register_eventer(Arc::clone(&eventer));

    let sinker: Arc<dyn Sinker> = match SinkerLoader::new(sinker_handle)
        .load()
        .context("initialising sinker")
    {
        Ok(sinker) => Arc::from(sinker),
        Err(err) => {
            cleaner.cleanup_eventer();
            return Err(err);
        }
    };
    cleaner.register_sinker(Arc::clone(&sinker));

    Ok((eventer, sinker))
}
