pub mod actions;
pub mod audit;
pub mod events;
pub mod policy;
pub mod tickets;

use std::future::Future;

use crate::error::AppError;

/// Drive an orchestrator future on the blocking pool. Submission and voting
/// commit to redb and hold ledger locks between awaits, so they run where a
/// slow commit cannot stall the async workers.
pub(crate) async fn on_blocking_pool<F, Fut, T>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = careguard_core::Result<T>>,
    T: Send + 'static,
{
    let handle = tokio::runtime::Handle::current();
    let out = tokio::task::spawn_blocking(move || handle.block_on(f()))
        .await
        .map_err(AppError::join)??;
    Ok(out)
}
