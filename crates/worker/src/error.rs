//! Error types for worker construction, registration and enqueueing.

use thiserror::Error;

use crate::MsgId;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by workers, routers and the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
	/// The worker was built without a router.
	#[error("worker {worker} router is missing")]
	MissingRouter {
		/// Name of the worker being built.
		worker: String,
	},

	/// The worker was built without a loop hook.
	#[error("worker {worker} loop hook is missing")]
	MissingLoopHook {
		/// Name of the worker being built.
		worker: String,
	},

	/// A worker with this name is already registered with the monitor.
	#[error("worker {0} already registered")]
	AlreadyRegistered(String),

	/// `start` was called on a worker whose loop is already running.
	#[error("worker {0} already started")]
	AlreadyStarted(String),

	/// A handler for this message id already exists in the router.
	#[error("router handler already registered for id {0}")]
	DuplicateHandler(MsgId),

	/// The worker loop thread could not be spawned.
	#[error("worker {worker} loop thread spawn failed: {reason}")]
	Spawn {
		/// Name of the worker being started.
		worker: String,
		/// OS error text.
		reason: String,
	},

	/// Non-blocking send found the mailbox at capacity.
	#[error("worker mailbox is full")]
	MailboxFull,

	/// The worker has been stopped and no longer accepts messages.
	#[error("worker is stopped")]
	WorkerStopped,
}

impl Error {
	/// Returns `true` for wiring mistakes the initializer should treat as
	/// unrecoverable (typically by aborting startup).
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::DuplicateHandler(_))
	}
}
