use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use lotledger_infra::DocumentStore;

use crate::session::ReconciliationSession;

/// Handle to control and join a background session worker.
#[derive(Debug)]
pub struct WorkerHandle<T> {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<T>>,
}

impl<T> WorkerHandle<T> {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// Returns what the worker handed back (the session), or `None` if the
    /// worker thread panicked.
    pub fn shutdown(mut self) -> Option<T> {
        let _ = self.shutdown.send(());
        self.join.take().and_then(|j| j.join().ok())
    }
}

/// Runs a [`ReconciliationSession`] on its own thread.
///
/// - Pumps the session every `tick` (snapshots are coalesced latest-wins)
/// - A failed pass is logged and retried on the next tick
/// - Supports graceful shutdown, handing the session back
#[derive(Debug)]
pub struct SessionWorker;

impl SessionWorker {
    pub fn spawn<S>(
        name: &str,
        session: ReconciliationSession<S>,
        tick: Duration,
    ) -> io::Result<WorkerHandle<ReconciliationSession<S>>>
    where
        S: DocumentStore + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let worker_name = name.to_string();

        let join = thread::Builder::new()
            .name(worker_name.clone())
            .spawn(move || worker_loop(&worker_name, session, shutdown_rx, tick))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<S: DocumentStore>(
    name: &str,
    mut session: ReconciliationSession<S>,
    shutdown_rx: mpsc::Receiver<()>,
    tick: Duration,
) -> ReconciliationSession<S> {
    loop {
        if let Err(err) = session.pump() {
            warn!(worker = name, error = %err, "session pass failed");
        }

        match shutdown_rx.recv_timeout(tick) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
        }
    }
    session
}
