//! Panic isolation for handlers, hooks and timeout callbacks.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Runs `f`, converting a panic into an `error!` log tagged with `what`.
///
/// Returns `None` when `f` panicked.
pub fn protect_run<R>(what: &str, f: impl FnOnce() -> R) -> Option<R> {
	match catch_unwind(AssertUnwindSafe(f)) {
		Ok(value) => Some(value),
		Err(payload) => {
			let backtrace = std::backtrace::Backtrace::capture();
			tracing::error!(
				what,
				panic = %panic_message(payload.as_ref()),
				backtrace = %backtrace,
				"worker.panic"
			);
			None
		}
	}
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
