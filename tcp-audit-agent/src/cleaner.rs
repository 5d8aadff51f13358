//! Exactly-once release of the pipeline endpoints.

use std::sync::Arc;

use log::warn;

use crate::sink::Sinker;
use crate::source::{Closeable, Eventer};

/// Holds back-references to the live eventer and sinker and releases them
/// on shutdown.
///
/// Endpoints that advertise the close capability are closed; others are
/// left alone. A registration is taken out before its endpoint is closed,
/// so cleaning up the same endpoint twice is a no-op. Close errors are
/// logged and discarded; cleanup always proceeds.
#[derive(Default)]
pub struct Cleaner {
    eventer: Option<Arc<dyn Eventer>>,
    sinker: Option<Arc<dyn Sinker>>,
}

impl Cleaner {
    pub fn new() -> Cleaner {
        Cleaner::default()
    }

    pub fn register_eventer(&mut self, eventer: Arc<dyn Eventer>) {
        self.eventer = Some(eventer);
    }

    pub fn register_sinker(&mut self, sinker: Arc<dyn Sinker>) {
        self.sinker = Some(sinker);
    }

    pub fn cleanup_eventer(&mut self) {
        if let Some(eventer) = self.eventer.take() {
            close_quietly(eventer.as_closeable(), "eventer");
        }
    }

    pub fn cleanup_sinker(&mut self) {
        if let Some(sinker) = self.sinker.take() {
            close_quietly(sinker.as_closeable(), "sinker");
        }
    }

    /// Release both endpoints, eventer first.
    pub fn cleanup_all(&mut self) {
        self.cleanup_eventer();
        self.cleanup_sinker();
    }
}

fn close_quietly(closeable: Option<&dyn Closeable>, what: &str) {
    if let Some(closeable) = closeable {
        if let Err(err) = closeable.close() {
            warn!("closing {what}: {err:#}");
        }
    }
}
