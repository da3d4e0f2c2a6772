//! Where crate work runs.
//!
//! Monitor tasks go to the caller's tokio runtime (or a small fallback runtime
//! outside of one). Worker loops get a dedicated OS thread each, driving a
//! private current-thread runtime, so a handler that blocks only ever blocks
//! its own worker.

use std::future::Future;
use std::io;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::join::LoopExit;
use crate::protect::protect_run;

fn runtime_handle() -> Handle {
	Handle::try_current().unwrap_or_else(|_| fallback_runtime().handle().clone())
}

fn fallback_runtime() -> &'static Runtime {
	static FALLBACK: OnceLock<Runtime> = OnceLock::new();
	FALLBACK.get_or_init(|| {
		tracing::debug!("worker.runtime.fallback");
		Builder::new_multi_thread()
			.worker_threads(1)
			.thread_name("safeworker-rt")
			.enable_all()
			.build()
			.expect("failed to build safeworker fallback runtime")
	})
}

/// Spawns a monitor task.
#[allow(clippy::disallowed_methods)]
pub(crate) fn spawn<F>(label: &str, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task = label, "worker.spawn");
	runtime_handle().spawn(fut)
}

/// Spawns work that may block for a long time, such as timeout callbacks.
#[allow(clippy::disallowed_methods)]
pub(crate) fn spawn_blocking<F, R>(label: &str, f: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(task = label, "worker.spawn_blocking");
	runtime_handle().spawn_blocking(f)
}

/// Runs the future built by `make` to completion on a new thread named
/// `thread_name`, inside a current-thread runtime owned by that thread.
///
/// The returned [`LoopExit`] fires when the thread is done, including when the
/// runtime cannot be built or the loop unwinds.
pub(crate) fn spawn_loop_thread<F, Fut>(thread_name: String, make: F) -> io::Result<LoopExit>
where
	F: FnOnce() -> Fut + Send + 'static,
	Fut: Future<Output = ()>,
{
	let exit = LoopExit::new();
	let guard = exit.guard();
	tracing::trace!(thread = %thread_name, "worker.spawn_loop_thread");
	std::thread::Builder::new().name(thread_name).spawn(move || {
		let _guard = guard;
		let runtime = match Builder::new_current_thread().enable_time().build() {
			Ok(runtime) => runtime,
			Err(err) => {
				tracing::error!(error = %err, "worker loop runtime unavailable");
				return;
			}
		};
		protect_run("worker loop", || runtime.block_on(make()));
	})?;
	Ok(exit)
}
