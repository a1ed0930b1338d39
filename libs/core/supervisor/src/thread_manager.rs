//! Worker process lifecycle state machine: spawn, handshake, run, stop.
//!
//! States: `NotStarted -> Starting -> Running -> Stopping -> Stopped`, with
//! `Errored` reachable from `Starting` or `Running` on a handshake timeout,
//! spawn failure, or unexpected exit. `start()` blocks until either a
//! `ready` envelope arrives or `handshake_timeout` elapses.

use std::time::Duration;

use supervisor_protocol::{Envelope, EnvelopeKind};
use tokio::time::timeout;

use crate::error::{SupervisorError, SupervisorResult};
use crate::transport::WorkerTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Errored,
}

#[derive(Debug, Clone)]
pub struct ThreadManagerConfig {
    pub handshake_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ThreadManagerConfig {
    fn default() -> Self {
        Self { handshake_timeout: Duration::from_secs(5), shutdown_grace: Duration::from_secs(5) }
    }
}

/// Drives one worker's lifecycle over an abstract [`WorkerTransport`].
pub struct ThreadManager<T: WorkerTransport> {
    config: ThreadManagerConfig,
    transport: Option<T>,
    state: WorkerState,
}

impl<T: WorkerTransport> ThreadManager<T> {
    pub fn new(config: ThreadManagerConfig) -> Self {
        Self { config, transport: None, state: WorkerState::NotStarted }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == WorkerState::Running
    }

    /// Take ownership of a freshly constructed transport and wait for its
    /// `ready` handshake before transitioning to `Running`.
    pub async fn start(&mut self, mut transport: T) -> SupervisorResult<()> {
        if self.state == WorkerState::Running || self.state == WorkerState::Starting {
            return Ok(());
        }
        self.state = WorkerState::Starting;

        let waited = timeout(self.config.handshake_timeout, wait_for_ready(&mut transport)).await;
        match waited {
            Ok(true) => {
                self.transport = Some(transport);
                self.state = WorkerState::Running;
                Ok(())
            }
            Ok(false) => {
                self.state = WorkerState::Errored;
                Err(SupervisorError::SpawnFailed("worker channel closed before handshake".into()))
            }
            Err(_) => {
                self.state = WorkerState::Errored;
                Err(SupervisorError::HandshakeTimeout)
            }
        }
    }

    pub async fn send(&mut self, envelope: &Envelope) -> SupervisorResult<()> {
        if self.state != WorkerState::Running {
            return Err(SupervisorError::WorkerNotRunning);
        }
        let transport = self.transport.as_mut().ok_or(SupervisorError::WorkerNotRunning)?;
        transport.send(envelope).await
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.transport.as_mut()?.recv().await
    }

    /// Request a graceful stop: sends `stop`, then force-terminates after
    /// `shutdown_grace` if the worker hasn't exited on its own.
    pub async fn stop(&mut self) -> SupervisorResult<()> {
        if self.state != WorkerState::Running && self.state != WorkerState::Starting {
            self.state = WorkerState::Stopped;
            return Ok(());
        }
        self.state = WorkerState::Stopping;

        if let Some(transport) = self.transport.as_mut() {
            let stop_envelope = Envelope::request(EnvelopeKind::Stop, None);
            let _ = transport.send(&stop_envelope).await;

            let grace = timeout(self.config.shutdown_grace, wait_for_exit(transport)).await;
            if grace.is_err() {
                tracing::warn!("worker did not exit within grace period, forcing shutdown");
            }
            let _ = transport.shutdown().await;
        }

        self.state = WorkerState::Stopped;
        Ok(())
    }

    pub fn is_alive(&mut self) -> bool {
        match self.transport.as_mut() {
            Some(transport) => transport.is_alive(),
            None => false,
        }
    }

    pub fn mark_errored(&mut self, reason: &str) {
        tracing::error!(reason, "worker transitioned to errored state");
        self.state = WorkerState::Errored;
    }
}

async fn wait_for_ready<T: WorkerTransport>(transport: &mut T) -> bool {
    loop {
        match transport.recv().await {
            Some(envelope) if envelope.kind == EnvelopeKind::Ready => return true,
            Some(_) => continue,
            None => return false,
        }
    }
}

async fn wait_for_exit<T: WorkerTransport>(transport: &mut T) {
    while transport.is_alive() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
