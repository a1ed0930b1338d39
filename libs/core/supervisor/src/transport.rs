//! Abstracts the worker channel behind a trait so [`crate::thread_manager`]
//! can be driven in tests without spawning real subprocesses.
//!
//! Production code uses [`ProcessTransport`], which spawns the worker binary
//! and speaks newline-delimited JSON envelopes over its stdin/stdout; its
//! stderr is left connected to the parent's so the worker's own tracing
//! output interleaves normally. Tests use `MockTransport` (behind
//! `cfg(test)`), built on `mockall`, to assert on exact send/receive
//! sequences without process overhead.

use std::process::Stdio;

use async_trait::async_trait;
use supervisor_protocol::Envelope;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::error::{SupervisorError, SupervisorResult};

/// A bidirectional worker channel: send one envelope, receive a stream of
/// envelopes, and report whether the underlying process is still alive.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn send(&mut self, envelope: &Envelope) -> SupervisorResult<()>;
    async fn recv(&mut self) -> Option<Envelope>;
    async fn shutdown(&mut self) -> SupervisorResult<()>;
    fn is_alive(&mut self) -> bool;
}

/// Spawns `program` as a child process and speaks the wire protocol over its
/// stdio. One JSON envelope per line in both directions.
pub struct ProcessTransport {
    child: Child,
    stdin: ChildStdin,
    incoming: mpsc::Receiver<Envelope>,
    _reader_task: tokio::task::JoinHandle<()>,
}

impl ProcessTransport {
    pub async fn spawn(program: &str, args: &[String]) -> SupervisorResult<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;

        let stdin = child.stdin.take().ok_or_else(|| SupervisorError::SpawnFailed("no stdin handle".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| SupervisorError::SpawnFailed("no stdout handle".into()))?;

        let (tx, rx) = mpsc::channel(256);
        let reader_task = tokio::spawn(read_envelopes(stdout, tx));

        Ok(Self { child, stdin, incoming: rx, _reader_task: reader_task })
    }
}

async fn read_envelopes(stdout: ChildStdout, tx: mpsc::Sender<Envelope>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match supervisor_protocol::decode_line(&line) {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping malformed line from worker stdout");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "worker stdout read error");
                break;
            }
        }
    }
}

#[async_trait]
impl WorkerTransport for ProcessTransport {
    async fn send(&mut self, envelope: &Envelope) -> SupervisorResult<()> {
        let line = supervisor_protocol::encode_line(envelope)?;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Envelope> {
        self.incoming.recv().await
    }

    async fn shutdown(&mut self) -> SupervisorResult<()> {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

#[cfg(test)]
pub use mock::MockTransport;

#[cfg(test)]
mod mock {
    use super::*;
    use mockall::mock;

    mock! {
        pub Transport {}

        #[async_trait]
        impl WorkerTransport for Transport {
            async fn send(&mut self, envelope: &Envelope) -> SupervisorResult<()>;
            async fn recv(&mut self) -> Option<Envelope>;
            async fn shutdown(&mut self) -> SupervisorResult<()>;
            fn is_alive(&mut self) -> bool;
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use supervisor_protocol::EnvelopeKind;

    #[tokio::test]
    async fn mock_transport_round_trips_a_send_and_recv() {
        let mut mock = mock::MockTransport::new();
        mock.expect_send().times(1).returning(|_| Ok(()));
        mock.expect_recv().times(1).returning(|| Some(Envelope::response("1", EnvelopeKind::Success, None)));

        let envelope = Envelope::request(EnvelopeKind::Ping, None);
        mock.send(&envelope).await.unwrap();
        let response = mock.recv().await.unwrap();
        assert_eq!(response.kind, EnvelopeKind::Success);
    }
}
