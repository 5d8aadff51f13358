//! One-shot OS signal handling.

use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot, watch};

/// Install a handler for the given signals.
///
/// The first arriving signal is delivered exactly once on the returned
/// receiver, and the returned done flag then flips to true, so an
/// observer released by the flag finds the signal value pending. Later
/// signals are absorbed silently. Any number of observers may clone and
/// await the flag.
pub fn install(
    signals: &[libc::c_int],
) -> io::Result<(oneshot::Receiver<i32>, watch::Receiver<bool>)> {
    let (first_tx, mut first_rx) = mpsc::channel::<i32>(1);

    for &signo in signals {
        let mut stream = signal(SignalKind::from_raw(signo))?;
        let first_tx = first_tx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                // A full buffer or closed receiver means a signal has
                // already won the race; swallow this one.
                let _ = first_tx.try_send(signo);
            }
        });
    }
    drop(first_tx);

    let (signal_tx, signal_rx) = oneshot::channel();
    let (done_tx, done_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Some(signo) = first_rx.recv().await {
            let _ = signal_tx.send(signo);
            let _ = done_tx.send(true);
        }
    });

    Ok((signal_rx, done_rx))
}
