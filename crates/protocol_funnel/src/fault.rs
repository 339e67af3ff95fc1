//! Fault boundary around a single protocol callback.
//!
//! Every callback the funnel invokes goes through [`guard`], which turns both a
//! returned `Err` and a panic into a [`ProtocolError`] value. Nothing escapes the
//! boundary, so one protocol can never unwind through the funnel or into another
//! protocol's bookkeeping.

use crate::error::ProtocolError;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Runs `callback`, converting a panic into [`ProtocolError::Panicked`].
pub fn guard<F>(callback: F) -> Result<(), ProtocolError>
where
    F: FnOnce() -> Result<(), ProtocolError>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(panic_info) => Err(panic_to_error(panic_info)),
    }
}

/// Runs a hook that has no way to report failure. A panic inside it is logged
/// and swallowed.
pub(crate) fn guard_hook<F>(hook_name: &str, hook: F)
where
    F: FnOnce(),
{
    if let Err(panic_info) = catch_unwind(AssertUnwindSafe(hook)) {
        tracing::error!(
            "Hook {} panicked: {}",
            hook_name,
            panic_message(panic_info.as_ref())
        );
    }
}

/// Helper to convert a panic payload to a `ProtocolError`
pub fn panic_to_error(panic_info: Box<dyn Any + Send>) -> ProtocolError {
    ProtocolError::Panicked(panic_message(panic_info.as_ref()))
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
