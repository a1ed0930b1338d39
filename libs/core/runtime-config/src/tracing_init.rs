use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Initialize the process-wide tracing subscriber.
///
/// - **Production** (`APP_ENV=production`): JSON output, no module targets,
///   defaulting to `info` unless `RUST_LOG` says otherwise.
/// - **Development** (default): pretty output with module targets, defaulting
///   to `debug`.
///
/// Infallible: a second call (common across integration tests sharing a
/// process) is a no-op.
pub fn init_tracing(environment: &Environment) {
    let is_production = environment.is_production();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new("info,supervisor_core=info")
        } else {
            EnvFilter::new("debug,supervisor_core=debug")
        }
    });

    let result = if is_production {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(false).try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).pretty().try_init()
    };

    match result {
        Ok(()) => info!(?environment, "tracing initialized"),
        Err(_) => debug!("tracing already initialized, skipping"),
    }
}
