//! The eventer contract and its plugin loader.

use anyhow::{bail, Context, Result};
use tcp_audit_types::Event;

use crate::plugin::PluginHandle;

/// Produces TCP state transition events, one per call.
///
/// Implementations are shared between the producer task and the shutdown
/// coordinator, so all methods take `&self`.
pub trait Eventer: Send + Sync {
    /// Block until the next relevant event is available.
    ///
    /// Never returns a "no event" sentinel: the call either produces an
    /// event or fails. Closing the eventer from another thread releases a
    /// blocked call with a terminal error.
    fn next_event(&self) -> Result<Event>;

    /// The close capability, if this eventer owns releasable resources.
    fn as_closeable(&self) -> Option<&dyn Closeable> {
        None
    }
}

/// Optional capability for pipeline endpoints holding OS resources.
///
/// Closing twice is safe; the second call is a no-op.
pub trait Closeable: Send + Sync {
    fn close(&self) -> Result<()>;
}

/// Constructor signature an eventer plugin must export.
pub type EventerConstructor = fn() -> Result<Box<dyn Eventer>>;

/// Loads an eventer from a plugin handle's constructor symbol.
pub struct EventerLoader<'a> {
    handle: &'a dyn PluginHandle,
}

impl<'a> EventerLoader<'a> {
    pub fn new(handle: &'a dyn PluginHandle) -> EventerLoader<'a> {
        EventerLoader { handle }
    }

    pub fn load(&self) -> Result<Box<dyn Eventer>> {
        let symbol = self.handle.load().context("loading eventer plugin")?;
        let Ok(constructor) = symbol.downcast::<EventerConstructor>() else {
            bail!("eventer plugin constructor has incorrect signature");
        };
        constructor()
    }
}
