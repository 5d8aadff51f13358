//! Orchestration of the processor lifecycle and the exit disposition.

use log::{error, info};
use tokio::sync::oneshot;

use crate::cleaner::Cleaner;
use crate::processor::EventProcessor;

/// How the process should exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Orderly shutdown without a pending signal.
    Clean,
    /// Fatal initialization or pipeline error.
    Errored,
    /// Orderly shutdown driven by the given signal.
    Signalled(i32),
}

impl ExitStatus {
    /// Process exit code; signals use the traditional Unix 128+n encoding.
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::Errored => 1,
            ExitStatus::Signalled(signo) => 128u8.wrapping_add(signo as u8),
        }
    }
}

/// Run the processor to completion, release the pipeline endpoints, and
/// translate the terminal condition into an exit disposition.
///
/// Cleanup runs on both paths, and closing the eventer is also what
/// releases a producer still parked in a blocking read.
pub async fn run(
    processor: &mut EventProcessor,
    cleaner: &mut Cleaner,
    pending_signal: oneshot::Receiver<i32>,
) -> ExitStatus {
    match processor.run().await {
        Err(err) => {
            error!("processing events: {err:#}");
            cleaner.cleanup_all();
            ExitStatus::Errored
        }
        Ok(()) => {
            cleaner.cleanup_all();
            match pending_signal.await {
                Ok(signo) => {
                    info!("shutting down on signal {signo}");
                    ExitStatus::Signalled(signo)
                }
                Err(_) => ExitStatus::Clean,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sample_event, CloseableEventer, CloseableSinker, CountingSinker, ScriptedEventer};
    use anyhow::anyhow;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::timeout;

    #[test]
    fn exit_codes_follow_unix_conventions() {
        assert_eq!(ExitStatus::Clean.code(), 0);
        assert_eq!(ExitStatus::Errored.code(), 1);
        assert_eq!(ExitStatus::Signalled(libc::SIGINT).code(), 130);
        assert_eq!(ExitStatus::Signalled(libc::SIGTERM).code(), 143);
    }

    #[tokio::test]
    async fn signal_driven_shutdown_cleans_up_and_encodes_the_signal() {
        let (eventer, _guard) = ScriptedEventer::with_script(vec![Ok(sample_event())]);
        let sinker = Arc::new(CountingSinker::new());
        let (done_tx, done) = watch::channel(false);
        let (signal_tx, signal_rx) = oneshot::channel();

        let closeable_eventer = Arc::new(CloseableEventer::new());
        let closeable_sinker = Arc::new(CloseableSinker::new());
        let mut cleaner = Cleaner::new();
        cleaner.register_eventer(Arc::clone(&closeable_eventer) as Arc<dyn crate::source::Eventer>);
        cleaner.register_sinker(Arc::clone(&closeable_sinker) as Arc<dyn crate::sink::Sinker>);

        let mut processor = EventProcessor::new(eventer, Arc::clone(&sinker) as Arc<dyn crate::sink::Sinker>, 3, done);

        // One event flows, then the handler reports SIGTERM.
        let driver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            signal_tx.send(libc::SIGTERM).unwrap();
            done_tx.send(true).unwrap();
            done_tx
        });

        let status = timeout(
            Duration::from_secs(5),
            run(&mut processor, &mut cleaner, signal_rx),
        )
        .await
        .unwrap();

        assert_eq!(status, ExitStatus::Signalled(libc::SIGTERM));
        assert_eq!(status.code(), 143);
        assert_eq!(sinker.events().len(), 1);
        assert_eq!(closeable_eventer.closes(), 1);
        assert_eq!(closeable_sinker.closes(), 1);
        drop(driver.await.unwrap());
    }

    #[tokio::test]
    async fn pipeline_failure_cleans_up_and_exits_errored() {
        let (eventer, _guard) = ScriptedEventer::with_script(vec![Err(anyhow!("broken source"))]);
        let (_done_tx, done) = watch::channel(false);
        let (_signal_tx, signal_rx) = oneshot::channel();

        let closeable_eventer = Arc::new(CloseableEventer::new());
        let mut cleaner = Cleaner::new();
        cleaner.register_eventer(Arc::clone(&closeable_eventer) as Arc<dyn crate::source::Eventer>);

        let mut processor = EventProcessor::new(eventer, Arc::new(CountingSinker::new()), 1, done);

        let status = timeout(
            Duration::from_secs(5),
            run(&mut processor, &mut cleaner, signal_rx),
        )
        .await
        .unwrap();

        assert_eq!(status, ExitStatus::Errored);
        assert_eq!(closeable_eventer.closes(), 1);
    }

    #[tokio::test]
    async fn done_without_pending_signal_exits_clean() {
        let (eventer, _guard) = ScriptedEventer::with_script(vec![]);
        let (done_tx, done) = watch::channel(false);
        let (signal_tx, signal_rx) = oneshot::channel::<i32>();
        drop(signal_tx); // no signal will ever arrive

        let mut cleaner = Cleaner::new();
        let mut processor = EventProcessor::new(eventer, Arc::new(CountingSinker::new()), 3, done);

        let driver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            done_tx.send(true).unwrap();
            done_tx
        });

        let status = timeout(
            Duration::from_secs(5),
            run(&mut processor, &mut cleaner, signal_rx),
        )
        .await
        .unwrap();

        assert_eq!(status, ExitStatus::Clean);
        drop(driver.await.unwrap());
    }
}
