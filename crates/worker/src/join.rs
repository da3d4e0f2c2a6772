use std::time::Duration;

use tokio_util::sync::{CancellationToken, DropGuard};

/// Completion signal of one worker loop thread.
///
/// The loop thread holds the [`DropGuard`]; any number of closers can wait on
/// clones of the token, before or after the thread finishes.
#[derive(Debug, Clone)]
pub(crate) struct LoopExit {
	exited: CancellationToken,
}

impl LoopExit {
	pub(crate) fn new() -> Self {
		Self {
			exited: CancellationToken::new(),
		}
	}

	/// Guard that marks the loop exited when dropped, unwinding included.
	pub(crate) fn guard(&self) -> DropGuard {
		self.exited.clone().drop_guard()
	}

	pub(crate) fn has_exited(&self) -> bool {
		self.exited.is_cancelled()
	}

	/// Waits until the loop has exited.
	pub(crate) async fn join(&self) {
		self.exited.cancelled().await;
	}

	/// Returns `true` if the loop exited within `timeout`.
	pub(crate) async fn join_with_timeout(&self, timeout: Duration) -> bool {
		tokio::time::timeout(timeout, self.join()).await.is_ok()
	}
}
