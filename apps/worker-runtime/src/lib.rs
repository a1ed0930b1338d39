//! The worker side of the supervised protocol: reads newline-delimited JSON
//! envelopes from stdin, dispatches them to a [`DomainServer`], and writes
//! responses (plus an unsolicited status heartbeat) to stdout.
//!
//! ## Architecture
//!
//! ```text
//! supervisor (parent process)
//!   ↓ stdin, one envelope per line
//! worker-runtime::run()
//!   ↓ dispatch by EnvelopeKind
//! DomainServer::{handle_data, reconfigure, cleanup}
//!   ↓
//! stdout, one envelope per line
//! ```
//!
//! `start` triggers the `ready` handshake; `stop` drains in-flight work and
//! exits; every other request kind maps to exactly one `DomainServer` call
//! or a built-in reply (`ping` -> `pong`). A `status` heartbeat is emitted
//! every 30 seconds regardless of request traffic.

mod domain;
mod sampler;

pub use domain::{DomainError, DomainServer, EchoServer};
pub use sampler::{MemorySampler, MemorySampleWire};

use std::time::Duration;

use eyre::{Result, WrapErr};
use serde_json::json;
use supervisor_config::Environment;
use supervisor_protocol::{Envelope, EnvelopeKind};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    supervisor_config::init_tracing(&environment);
    info!(?environment, "worker runtime starting");

    let mut server: Box<dyn DomainServer> = Box::new(EchoServer);
    serve(&mut server).await
}

/// Drives the envelope loop against an injected domain server; split out
/// from [`run`] so tests can exercise the dispatch logic without spawning a
/// real subprocess or a concrete domain.
pub async fn serve(server: &mut Box<dyn DomainServer>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();
    let mut sampler = MemorySampler::new();

    write_envelope(&mut stdout, &Envelope::response(String::new(), EnvelopeKind::Ready, None)).await?;

    let mut status_tick = tokio::time::interval(STATUS_INTERVAL);
    status_tick.tick().await; // first tick fires immediately; consume it so the first heartbeat is at +30s

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.wrap_err("reading stdin")? {
                    Some(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match supervisor_protocol::decode_line(&line) {
                            Ok(envelope) => {
                                if !handle_envelope(envelope, server.as_mut(), &mut sampler, &mut stdout).await? {
                                    return Ok(());
                                }
                            }
                            Err(e) => warn!(error = %e, "dropping malformed line from supervisor"),
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        return Ok(());
                    }
                }
            }
            _ = status_tick.tick() => {
                let sample = sampler.sample();
                let mut envelope = Envelope::request(EnvelopeKind::Status, Some(serde_json::to_value(sample)?));
                envelope.priority = sampler::STATUS_PRIORITY;
                write_envelope(&mut stdout, &envelope).await?;
            }
        }
    }
}

/// Returns `false` when the worker should exit after this envelope (a `stop`
/// request), `true` otherwise.
async fn handle_envelope(
    envelope: Envelope,
    server: &mut dyn DomainServer,
    sampler: &mut MemorySampler,
    stdout: &mut (impl tokio::io::AsyncWrite + Unpin),
) -> Result<bool> {
    match envelope.kind {
        EnvelopeKind::Start => {
            let response = Envelope::response(envelope.id, EnvelopeKind::Ready, None);
            write_envelope(stdout, &response).await?;
        }
        EnvelopeKind::Stop => {
            let response = Envelope::response(envelope.id, EnvelopeKind::Success, None);
            write_envelope(stdout, &response).await?;
            server.cleanup().await.ok();
            return Ok(false);
        }
        EnvelopeKind::Ping => {
            let sample = sampler.sample();
            let response = Envelope::response(envelope.id, EnvelopeKind::Pong, Some(serde_json::to_value(sample)?));
            write_envelope(stdout, &response).await?;
        }
        EnvelopeKind::Config => {
            let response = match server.reconfigure(envelope.payload).await {
                Ok(()) => Envelope::response(envelope.id, EnvelopeKind::Success, None),
                Err(e) => error_response(envelope.id, &e),
            };
            write_envelope(stdout, &response).await?;
        }
        EnvelopeKind::Data => {
            let response = match server.handle_data(envelope.payload).await {
                Ok(payload) => Envelope::response(envelope.id, EnvelopeKind::Success, payload),
                Err(e) => error_response(envelope.id, &e),
            };
            write_envelope(stdout, &response).await?;
        }
        EnvelopeKind::Gc => {
            let before = sampler.sample();
            server.request_gc();
            let after = sampler.sample();
            let response = Envelope::response(
                envelope.id,
                EnvelopeKind::Success,
                Some(json!({ "before": before, "after": after })),
            );
            write_envelope(stdout, &response).await?;
        }
        EnvelopeKind::Cleanup => {
            let resource = envelope.payload.as_ref().and_then(|p| p.get("resource")).and_then(|v| v.as_str()).map(str::to_string);
            let response = match server.cleanup_resource(resource.as_deref()).await {
                Ok(bytes_freed) => {
                    Envelope::response(envelope.id, EnvelopeKind::Success, Some(json!({ "bytes_freed": bytes_freed })))
                }
                Err(e) => error_response(envelope.id, &e),
            };
            write_envelope(stdout, &response).await?;
        }
        EnvelopeKind::Status => {
            let sample = sampler.sample();
            let response = Envelope::response(envelope.id, EnvelopeKind::Status, Some(serde_json::to_value(sample)?));
            write_envelope(stdout, &response).await?;
        }
        EnvelopeKind::Success | EnvelopeKind::Error | EnvelopeKind::Pong | EnvelopeKind::Ready => {
            warn!(kind = ?envelope.kind, "worker received a response-only kind as a request, ignoring");
        }
    }
    Ok(true)
}

fn error_response(request_id: String, error: &DomainError) -> Envelope {
    Envelope::response(request_id, EnvelopeKind::Error, Some(json!({ "message": error.to_string() })))
}

async fn write_envelope(stdout: &mut (impl tokio::io::AsyncWrite + Unpin), envelope: &Envelope) -> Result<()> {
    let line = supervisor_protocol::encode_line(envelope).wrap_err("encoding envelope")?;
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
