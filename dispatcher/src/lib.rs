pub mod cache;
pub mod composite;
pub mod config;
pub mod errors;
pub mod invoker;
pub mod metrics_defs;
pub mod rewrite;
pub mod service;
pub mod template;

#[cfg(test)]
pub mod testutils;

pub use config::{BackendSettings, CacheSettings, LockSettings};
pub use errors::GatewayError;
pub use service::{Dispatcher, DispatcherService};

use directory::Directory;
use shared::http::run_http_service;
use std::sync::Arc;

/// Serves the dispatcher on the given listener until the process exits.
pub async fn run(
    host: &str,
    port: u16,
    directory: Arc<Directory>,
    backend: &BackendSettings,
    cache: CacheSettings,
) -> Result<(), GatewayError> {
    let dispatcher = Dispatcher::new(directory, backend, cache);
    let service = DispatcherService::new(dispatcher);

    tracing::info!(host, port, "Dispatcher listening");
    run_http_service(host, port, service).await
}
