// Blocking adapter: drive an async operation to completion off the caller's runtime

use crate::error::{MongoliteError, Result};
use std::future::Future;

/// Run `future` to completion on a fresh current-thread runtime living on
/// its own scoped thread. Never touches the caller's runtime, so it is safe
/// to call from inside one.
pub fn block_on<F>(future: F) -> Result<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    std::thread::scope(|scope| {
        let handle = scope.spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| MongoliteError::Runtime(format!("failed to build runtime: {e}")))?;
            Ok(runtime.block_on(future))
        });

        handle
            .join()
            .map_err(|_| MongoliteError::Runtime("blocking operation panicked".into()))?
    })
}
