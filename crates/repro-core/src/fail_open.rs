//! Fail-open utilities for best-effort cleanup
//!
//! Use these for work whose failure must not change a job's outcome, like
//! removing scratch directories after the result is known.
//!
//! DO NOT use fail-open for:
//! - Transmat materialize/commit (integrity)
//! - Assembly construction (correctness)

use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`. Safe to
/// call from `Drop` impls and blocking threads.
///
/// # Usage
///
/// ```no_run
/// use repro_core::fail_open::fail_open_sync;
/// use repro_core::Result;
///
/// fn remove_scratch() -> Result<()> {
///     Ok(())
/// }
///
/// let result = fail_open_sync("scratch cleanup", remove_scratch);
/// // result is None if remove_scratch() failed, otherwise Some(())
/// ```
pub fn fail_open_sync<F, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Result<T>,
{
    match f() {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
