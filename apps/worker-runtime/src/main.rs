//! Worker runtime entry point: a subprocess spawned by the supervisor that
//! speaks the envelope protocol over its own stdin/stdout.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    worker_runtime::run().await
}
