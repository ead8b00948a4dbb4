pub mod automation;
pub mod events;
pub mod initialization;
pub mod jobs;
pub mod schedules;

use adpilot_core::Engine;

use crate::error::AppError;
use crate::state::AppState;

/// Run a synchronous engine call (store reads and writes) off the async runtime.
pub(crate) async fn blocking<T, F>(app: &AppState, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> adpilot_core::Result<T> + Send + 'static,
{
    let engine = app.engine.clone();
    let value = tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(value)
}
