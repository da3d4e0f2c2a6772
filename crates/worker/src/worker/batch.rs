use std::time::Duration;

use tokio::time::Instant;

use crate::config::WorkerConfig;
use crate::mailbox::{MailboxReceiver, MailboxTryRecvError};

/// Batch collection limits for one worker loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchPolicy {
	/// Most messages collected into one batch.
	pub(crate) limit: usize,
	/// Longest time spent collecting one batch.
	pub(crate) max_wait: Duration,
	/// Idle tick period.
	pub(crate) loop_interval: Duration,
}

impl BatchPolicy {
	pub(crate) fn new(capacity: usize, config: &WorkerConfig) -> Self {
		Self {
			limit: (capacity / 10).max(1),
			max_wait: config.batch_max_wait(),
			loop_interval: config.loop_interval(),
		}
	}

	/// Extends `batch` with whatever is already queued.
	///
	/// Stops when the mailbox is empty, the batch reaches `limit`, or
	/// `max_wait` has elapsed. The flag is `true` once the mailbox is closed
	/// and drained.
	pub(crate) fn fetch_more<T>(&self, rx: &MailboxReceiver<T>, mut batch: Vec<T>) -> (Vec<T>, bool) {
		let started = Instant::now();
		if batch.len() >= self.limit {
			return (batch, false);
		}
		loop {
			match rx.try_recv() {
				Ok(msg) => {
					batch.push(msg);
					if batch.len() >= self.limit || started.elapsed() >= self.max_wait {
						return (batch, false);
					}
				}
				Err(MailboxTryRecvError::Empty) => return (batch, false),
				Err(MailboxTryRecvError::Closed) => return (batch, true),
			}
		}
	}
}
