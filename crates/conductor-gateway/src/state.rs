use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use conductor_engine::Pipeline;

/// Shared application state for axum handlers.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Parent of every run's cancellation token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}
