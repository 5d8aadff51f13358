//! The event pump coupling an eventer to a sinker.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use tcp_audit_types::Event;
use tokio::sync::{mpsc, watch};
use tokio::task;

use crate::sink::Sinker;
use crate::source::Eventer;

/// Default bound on back-to-back event or sink errors.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Pipes events from an eventer straight into a sinker.
///
/// Events pass through unmodified; an event whose production or delivery
/// fails is dropped. Up to `max_consecutive_errors` back-to-back failures
/// of either kind are tolerated, and any successful delivery resets the
/// tally. Setting the done flag makes `run` return at its next wait.
pub struct EventProcessor {
    eventer: Arc<dyn Eventer>,
    sinker: Arc<dyn Sinker>,
    max_consecutive_errors: u32,
    done: watch::Receiver<bool>,
}

impl EventProcessor {
    pub fn new(
        eventer: Arc<dyn Eventer>,
        sinker: Arc<dyn Sinker>,
        max_consecutive_errors: u32,
        done: watch::Receiver<bool>,
    ) -> EventProcessor {
        EventProcessor {
            eventer,
            sinker,
            max_consecutive_errors,
            done,
        }
    }

    /// Pump events until cancelled (`Ok`) or the consecutive-error bound
    /// trips (`Err`, wrapping the last failure).
    pub async fn run(&mut self) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (mut event_rx, mut error_rx) = start_producer(Arc::clone(&self.eventer), stop_rx);

        let mut consecutive_errors = 0u32;
        let result = loop {
            // Check for cancellation first, so that a pending event never
            // wins a race against an already-set done flag. Which of the
            // two done checks observes the flag is not deterministic.
            if *self.done.borrow() {
                break Ok(());
            }

            tokio::select! {
                _ = self.done.changed() => break Ok(()),
                event = event_rx.recv() => match event {
                    Some(event) => {
                        debug!("TCP state event: {event}");
                        match self.sinker.sink(&event) {
                            Ok(()) => consecutive_errors = 0,
                            Err(err) => {
                                warn!("sinking event: {err:#}");
                                consecutive_errors += 1;
                                if consecutive_errors == self.max_consecutive_errors {
                                    break Err(err.context("too many consecutive event errors"));
                                }
                            }
                        }
                    }
                    None => break Err(anyhow!("event stream closed unexpectedly")),
                },
                err = error_rx.recv() => match err {
                    Some(err) => {
                        warn!("getting event: {err:#}");
                        consecutive_errors += 1;
                        if consecutive_errors == self.max_consecutive_errors {
                            break Err(err.context("too many consecutive event errors"));
                        }
                    }
                    None => break Err(anyhow!("event stream closed unexpectedly")),
                },
            }
        };

        // Stop the producer on every exit path. If it is parked inside
        // next_event(), closing the eventer is what releases it.
        let _ = stop_tx.send(true);

        result
    }
}

/// Run the blocking eventer on its own thread, converting its results
/// into channels the main loop can select over.
fn start_producer(
    eventer: Arc<dyn Eventer>,
    stop: watch::Receiver<bool>,
) -> (mpsc::Receiver<Event>, mpsc::Receiver<anyhow::Error>) {
    let (event_tx, event_rx) = mpsc::channel(1);
    let (error_tx, error_rx) = mpsc::channel(1);

    task::spawn_blocking(move || loop {
        if *stop.borrow() {
            break;
        }

        let result = eventer.next_event(); // blocks until the eventer is closed

        // Re-check before handing the result over, so a stopped pump is
        // never blocked on again.
        if *stop.borrow() {
            break;
        }

        let delivered = match result {
            Ok(event) => event_tx.blocking_send(event).is_ok(),
            Err(err) => error_tx.blocking_send(err).is_ok(),
        };
        if !delivered {
            break; // pump is gone
        }
    });

    (event_rx, error_rx)
}
