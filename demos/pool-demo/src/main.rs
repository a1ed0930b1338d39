//! Spawns a couple of `worker-runtime` subprocesses behind a `WorkerPool`,
//! sends a handful of `data` requests through them, and prints the resulting
//! pool status. Run with `cargo run --bin pool-demo` from the workspace
//! root after building `worker-runtime` in the same profile.

use std::time::Duration;

use eyre::{Result, WrapErr};
use serde_json::json;
use supervisor_config::Environment;
use supervisor_core::{
    Envelope, EnvelopeKind, LoadBalanceStrategy, Priority, ProcessTransport, ThreadingService, ThreadingServiceConfig, WorkerPool,
    WorkerPoolConfig,
};

const WORKER_COUNT: usize = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let environment = Environment::from_env();
    supervisor_config::init_tracing(&environment);

    let mut pool_config = WorkerPoolConfig::default();
    pool_config.min_workers = WORKER_COUNT;
    pool_config.max_workers = WORKER_COUNT;
    pool_config.strategy = LoadBalanceStrategy::RoundRobin;
    let mut pool = WorkerPool::new(pool_config);

    let mut services = Vec::new();
    for i in 0..WORKER_COUNT {
        let worker_id = format!("worker-{i}");
        pool.add_worker(worker_id.clone());

        let mut service: ThreadingService<ProcessTransport> = ThreadingService::new(ThreadingServiceConfig::default());
        let transport = ProcessTransport::spawn("./target/debug/worker-runtime", &[])
            .await
            .wrap_err("spawning worker-runtime; build it first with `cargo build --bin worker-runtime`")?;
        service.start(transport).await.wrap_err("handshaking with worker")?;
        services.push((worker_id, service));
    }

    for i in 0..5 {
        let Some(worker_id) = pool.select_worker(Priority::Normal) else {
            tracing::warn!("no healthy workers available");
            break;
        };
        pool.record_dispatch(&worker_id);

        let Some((_, service)) = services.iter_mut().find(|(id, _)| *id == worker_id) else {
            continue;
        };
        let envelope = Envelope::request(EnvelopeKind::Data, Some(json!({ "sequence": i })));
        service.enqueue(envelope)?;
        if let Some(rx) = service.dispatch_next().await? {
            service.pump_incoming().await;
            match tokio::time::timeout(Duration::from_secs(2), rx).await {
                Ok(Ok(response)) => {
                    let payload = response.payload.clone();
                    tracing::info!(?worker_id, ?payload, "got response");
                }
                Ok(Err(_)) => tracing::warn!(?worker_id, "request was cancelled"),
                Err(_) => tracing::warn!(?worker_id, "request timed out"),
            }
        }
        pool.record_completion(&worker_id);
    }

    for (worker_id, mut service) in services {
        let status = service.status();
        let worker_state = status.worker_state;
        tracing::info!(?worker_id, ?worker_state, queue_size = status.queue_size, "final status");
        service.stop().await.ok();
    }

    Ok(())
}
