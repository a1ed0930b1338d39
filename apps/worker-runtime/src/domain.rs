//! The seam a concrete worker plugs into: everything that isn't envelope
//! plumbing, health, or memory reporting lives behind [`DomainServer`].

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("{0}")]
    Failed(String),
}

/// The application-specific half of a worker. `worker-runtime` owns the
/// envelope loop, handshake, health, and memory reporting; everything a
/// concrete worker actually does lives here.
#[async_trait]
pub trait DomainServer: Send {
    /// Handle one `data` request, returning the JSON payload for the
    /// `success` response (or an error for the `error` response).
    async fn handle_data(&mut self, payload: Option<Value>) -> Result<Option<Value>, DomainError>;

    /// Apply a `config` envelope's payload. Default: accept and ignore.
    async fn reconfigure(&mut self, _payload: Option<Value>) -> Result<(), DomainError> {
        Ok(())
    }

    /// Release all resources this server is holding, on worker shutdown.
    /// Default: no-op.
    async fn cleanup(&mut self) -> Result<(), DomainError> {
        Ok(())
    }

    /// Release one named tracked resource (or every resource, if `None`),
    /// answering a `cleanup` request. Returns the estimated bytes freed.
    /// Default: defers to [`Self::cleanup`] and reports zero, since a
    /// generic domain server has no resource-level accounting to report.
    async fn cleanup_resource(&mut self, _name: Option<&str>) -> Result<u64, DomainError> {
        self.cleanup().await?;
        Ok(0)
    }

    /// Request a runtime GC if the domain has one available. Default: no-op
    /// — plain Rust allocations have no userspace heap to compact, so the
    /// before/after memory samples bracketing this call simply observe
    /// whatever the allocator already reclaimed on its own.
    fn request_gc(&mut self) {}
}

/// A trivial domain server used by the `pool-demo` binary and as a fallback
/// when no concrete domain is wired in: echoes its input payload back.
pub struct EchoServer;

#[async_trait]
impl DomainServer for EchoServer {
    async fn handle_data(&mut self, payload: Option<Value>) -> Result<Option<Value>, DomainError> {
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn echo_server_returns_its_input() {
        let mut server = EchoServer;
        let result = server.handle_data(Some(json!({"x": 1}))).await.unwrap();
        assert_eq!(result, Some(json!({"x": 1})));
    }
}
