//! In-process fakes shared by the unit tests.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::SystemTime;

use anyhow::{anyhow, Result};
use tcp_audit_types::{Event, TcpState};

use crate::sink::Sinker;
use crate::source::{Closeable, Eventer};

pub(crate) fn sample_event() -> Event {
    Event {
        time: SystemTime::UNIX_EPOCH,
        pid_on_cpu: 1234,
        command_on_cpu: "curl".to_string(),
        source_ip: Ipv4Addr::new(10, 0, 0, 1),
        dest_ip: Ipv4Addr::new(93, 184, 216, 34),
        source_port: 55000,
        dest_port: 443,
        old_state: TcpState::SynSent,
        new_state: TcpState::Established,
    }
}

/// Keeps a [`ScriptedEventer`] blocked after its script runs out;
/// dropping the guard releases it with an error.
pub(crate) struct BlockGuard(#[allow(dead_code)] mpsc::Sender<()>);

/// Eventer that plays back a fixed script of results, then blocks the way
/// a quiet trace pipe would.
pub(crate) struct ScriptedEventer {
    script: Mutex<VecDeque<Result<Event>>>,
    blocker: Mutex<mpsc::Receiver<()>>,
    _keep_open: Option<mpsc::Sender<()>>,
}

impl ScriptedEventer {
    pub(crate) fn with_script(
        script: Vec<Result<Event>>,
    ) -> (std::sync::Arc<ScriptedEventer>, BlockGuard) {
        let (keep_tx, keep_rx) = mpsc::channel();
        let eventer = ScriptedEventer {
            script: Mutex::new(script.into()),
            blocker: Mutex::new(keep_rx),
            _keep_open: None,
        };
        (std::sync::Arc::new(eventer), BlockGuard(keep_tx))
    }

    /// An eventer that blocks on first call for as long as it lives.
    pub(crate) fn empty() -> ScriptedEventer {
        let (keep_tx, keep_rx) = mpsc::channel();
        ScriptedEventer {
            script: Mutex::new(VecDeque::new()),
            blocker: Mutex::new(keep_rx),
            _keep_open: Some(keep_tx),
        }
    }
}

impl Eventer for ScriptedEventer {
    fn next_event(&self) -> Result<Event> {
        if let Some(result) = self.script.lock().unwrap().pop_front() {
            return result;
        }

        // Script exhausted: park until the guard is dropped.
        let _ = self.blocker.lock().unwrap().recv();
        Err(anyhow!("event script exhausted"))
    }
}

/// Sinker recording every event it accepts.
#[derive(Default)]
pub(crate) struct CountingSinker {
    events: Mutex<Vec<Event>>,
}

impl CountingSinker {
    pub(crate) fn new() -> CountingSinker {
        CountingSinker::default()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Sinker for CountingSinker {
    fn sink(&self, event: &Event) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Sinker that refuses every event with the same message.
pub(crate) struct FailingSinker {
    message: &'static str,
}

impl FailingSinker {
    pub(crate) fn new(message: &'static str) -> FailingSinker {
        FailingSinker { message }
    }
}

impl Sinker for FailingSinker {
    fn sink(&self, _event: &Event) -> Result<()> {
        Err(anyhow!(self.message))
    }
}

/// Eventer advertising the close capability, counting closes.
#[derive(Default)]
pub(crate) struct CloseableEventer {
    closes: AtomicUsize,
}

impl CloseableEventer {
    pub(crate) fn new() -> CloseableEventer {
        CloseableEventer::default()
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Eventer for CloseableEventer {
    fn next_event(&self) -> Result<Event> {
        Err(anyhow!("not producing"))
    }

    fn as_closeable(&self) -> Option<&dyn Closeable> {
        Some(self)
    }
}

impl Closeable for CloseableEventer {
    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sinker advertising the close capability, counting closes.
#[derive(Default)]
pub(crate) struct CloseableSinker {
    closes: AtomicUsize,
}

impl CloseableSinker {
    pub(crate) fn new() -> CloseableSinker {
        CloseableSinker::default()
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Sinker for CloseableSinker {
    fn sink(&self, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn as_closeable(&self) -> Option<&dyn Closeable> {
        Some(self)
    }
}

impl Closeable for CloseableSinker {
    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
