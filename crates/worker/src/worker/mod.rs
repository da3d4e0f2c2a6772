//! Named single-threaded workers.
//!
//! A [`Worker`] owns a bounded mailbox and one serial loop running on its own
//! OS thread, so a blocked handler stalls only that worker while the
//! [`Monitor`] keeps ticking and can report it. The loop wakes on
//! a message or on an idle tick, opportunistically drains more queued messages
//! into a batch, runs the loop hook, hands the batch to the [`Router`], and
//! reports liveness to the [`Monitor`]. Closing drains everything queued
//! before the close and then stops the loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{DEFAULT_MAILBOX_CAPACITY, WorkerConfig};
use crate::error::{Error, Result};
use crate::join::LoopExit;
use crate::mailbox::{Mailbox, MailboxReceiver, MailboxSendError, MailboxSender};
use crate::monitor::{Monitor, TimeoutCallback};
use crate::protect::protect_run;
use crate::router::{InFlight, InFlightSlot, Msg, MsgId, Router};
use crate::trace::TraceId;

mod batch;

use batch::BatchPolicy;

type LoopHook = Box<dyn FnMut() + Send>;
type LifecycleHook = Box<dyn FnOnce() + Send>;

/// Builder for one [`Worker`].
pub struct WorkerBuilder<A> {
	name: String,
	monitor: Monitor,
	config: WorkerConfig,
	router: Option<Router<A>>,
	loop_hook: Option<LoopHook>,
	before_loop: Option<LifecycleHook>,
	after_loop: Option<LifecycleHook>,
	on_timeout: Option<TimeoutCallback>,
}

impl<A> WorkerBuilder<A>
where
	A: fmt::Debug + Send + 'static,
{
	fn new(name: String, monitor: Monitor) -> Self {
		Self {
			name,
			monitor,
			config: WorkerConfig::default(),
			router: None,
			loop_hook: None,
			before_loop: None,
			after_loop: None,
			on_timeout: None,
		}
	}

	/// Replaces all tunables.
	#[must_use]
	pub fn config(mut self, config: WorkerConfig) -> Self {
		self.config = config;
		self
	}

	/// Sets the mailbox capacity. Zero falls back to the default.
	#[must_use]
	pub fn capacity(mut self, capacity: usize) -> Self {
		self.config.mailbox_capacity = capacity;
		self
	}

	/// Sets the router. Required.
	#[must_use]
	pub fn router(mut self, router: Router<A>) -> Self {
		self.router = Some(router);
		self
	}

	/// Sets the hook run once per loop iteration, with or without traffic. Required.
	#[must_use]
	pub fn loop_hook(mut self, hook: impl FnMut() + Send + 'static) -> Self {
		self.loop_hook = Some(Box::new(hook));
		self
	}

	/// Sets a hook run on the loop task before the first iteration.
	#[must_use]
	pub fn before_loop(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
		self.before_loop = Some(Box::new(hook));
		self
	}

	/// Sets a hook run on the loop task after the final batch.
	#[must_use]
	pub fn after_loop(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
		self.after_loop = Some(Box::new(hook));
		self
	}

	/// Sets an extra callback run after the built-in offline log whenever the
	/// monitor reports this worker as stuck.
	#[must_use]
	pub fn on_timeout(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
		self.on_timeout = Some(Arc::new(callback));
		self
	}

	/// Validates the configuration and creates the mailbox.
	pub fn build(self) -> Result<Worker<A>> {
		let Some(mut router) = self.router else {
			return Err(Error::MissingRouter { worker: self.name });
		};
		let Some(loop_hook) = self.loop_hook else {
			return Err(Error::MissingLoopHook { worker: self.name });
		};

		let mut config = self.config;
		if config.mailbox_capacity == 0 {
			tracing::warn!(
				worker = %self.name,
				capacity = DEFAULT_MAILBOX_CAPACITY,
				"worker mailbox capacity not set, using default"
			);
			config.mailbox_capacity = DEFAULT_MAILBOX_CAPACITY;
		}

		router.bind(&self.name, config.slow_call());
		let in_flight = router.in_flight();
		let mailbox = Mailbox::new(config.mailbox_capacity);
		let sender = WorkerSender {
			name: Arc::from(self.name.as_str()),
			tx: mailbox.sender(),
			stopped: Arc::new(AtomicBool::new(false)),
		};
		let policy = BatchPolicy::new(config.mailbox_capacity, &config);

		tracing::info!(worker = %self.name, capacity = config.mailbox_capacity, batch_limit = policy.limit, "worker.init");

		Ok(Worker {
			name: self.name,
			monitor: self.monitor,
			sender,
			in_flight,
			pending: Mutex::new(Some(LoopState {
				rx: mailbox.into_receiver(),
				router,
				loop_hook,
				before_loop: self.before_loop,
				after_loop: self.after_loop,
				policy,
			})),
			on_timeout: self.on_timeout,
			exit: OnceLock::new(),
		})
	}
}

/// Everything the loop task takes ownership of at start.
struct LoopState<A> {
	rx: MailboxReceiver<Msg<A>>,
	router: Router<A>,
	loop_hook: LoopHook,
	before_loop: Option<LifecycleHook>,
	after_loop: Option<LifecycleHook>,
	policy: BatchPolicy,
}

/// Cloneable producer handle for one worker.
pub struct WorkerSender<A> {
	name: Arc<str>,
	tx: MailboxSender<Msg<A>>,
	stopped: Arc<AtomicBool>,
}

impl<A> Clone for WorkerSender<A> {
	fn clone(&self) -> Self {
		Self {
			name: Arc::clone(&self.name),
			tx: self.tx.clone(),
			stopped: Arc::clone(&self.stopped),
		}
	}
}

impl<A> fmt::Debug for WorkerSender<A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WorkerSender")
			.field("worker", &self.name)
			.field("pending", &self.tx.len())
			.field("stopped", &self.stopped.load(Ordering::Acquire))
			.finish()
	}
}

impl<A> WorkerSender<A>
where
	A: Send + 'static,
{
	/// Worker this handle sends to.
	pub fn worker(&self) -> &str {
		&self.name
	}

	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::Acquire)
	}

	/// Enqueues a message with a fresh trace id, waiting while the mailbox is
	/// full. Dropped silently once the worker is stopped.
	pub async fn send(&self, id: MsgId, args: A) {
		self.enqueue(id, args, TraceId::generate()).await;
	}

	/// Like [`WorkerSender::send`], continuing the trace chain of `parent`.
	pub async fn send_traced(&self, parent: &TraceId, id: MsgId, args: A) {
		self.enqueue(id, args, TraceId::derive(Some(parent))).await;
	}

	/// Non-blocking enqueue with a fresh trace id.
	pub fn try_send(&self, id: MsgId, args: A) -> Result<()> {
		self.try_enqueue(id, args, TraceId::generate())
	}

	/// Non-blocking enqueue continuing the trace chain of `parent`.
	pub fn try_send_traced(&self, parent: &TraceId, id: MsgId, args: A) -> Result<()> {
		self.try_enqueue(id, args, TraceId::derive(Some(parent)))
	}

	async fn enqueue(&self, id: MsgId, args: A, trace_id: TraceId) {
		if self.is_stopped() {
			tracing::trace!(worker = %self.name, msg_id = id, "worker.send.dropped");
			return;
		}
		if self.tx.send(Msg::new(id, args, trace_id)).await.is_err() {
			tracing::trace!(worker = %self.name, msg_id = id, "worker.send.dropped");
		}
	}

	fn try_enqueue(&self, id: MsgId, args: A, trace_id: TraceId) -> Result<()> {
		if self.is_stopped() {
			return Err(Error::WorkerStopped);
		}
		self.tx.try_send(Msg::new(id, args, trace_id)).map_err(|err| match err {
			MailboxSendError::Full => Error::MailboxFull,
			MailboxSendError::Closed => Error::WorkerStopped,
		})
	}
}

/// A named worker with a bounded mailbox and one serial loop.
pub struct Worker<A> {
	name: String,
	monitor: Monitor,
	sender: WorkerSender<A>,
	in_flight: InFlightSlot,
	pending: Mutex<Option<LoopState<A>>>,
	on_timeout: Option<TimeoutCallback>,
	exit: OnceLock<LoopExit>,
}

impl<A> Drop for Worker<A> {
	fn drop(&mut self) {
		self.sender.stopped.store(true, Ordering::Release);
		self.sender.tx.close();
	}
}

impl<A> fmt::Debug for Worker<A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Worker")
			.field("name", &self.name)
			.field("pending", &self.sender.tx.len())
			.field("capacity", &self.sender.tx.capacity())
			.field("started", &self.exit.get().is_some())
			.field("stopped", &self.sender.stopped.load(Ordering::Acquire))
			.finish()
	}
}

impl<A> Worker<A>
where
	A: fmt::Debug + Send + 'static,
{
	/// Starts building a worker that reports to `monitor`.
	pub fn builder(name: impl Into<String>, monitor: &Monitor) -> WorkerBuilder<A> {
		WorkerBuilder::new(name.into(), monitor.clone())
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Messages currently queued.
	pub fn pending(&self) -> usize {
		self.sender.tx.len()
	}

	pub fn capacity(&self) -> usize {
		self.sender.tx.capacity()
	}

	pub fn is_stopped(&self) -> bool {
		self.sender.is_stopped()
	}

	/// Message the loop is executing right now, if any.
	pub fn current_message(&self) -> Option<InFlight> {
		self.in_flight.get()
	}

	/// Returns a cloneable producer handle.
	pub fn sender(&self) -> WorkerSender<A> {
		self.sender.clone()
	}

	/// See [`WorkerSender::send`].
	pub async fn send(&self, id: MsgId, args: A) {
		self.sender.send(id, args).await;
	}

	/// See [`WorkerSender::send_traced`].
	pub async fn send_traced(&self, parent: &TraceId, id: MsgId, args: A) {
		self.sender.send_traced(parent, id, args).await;
	}

	/// See [`WorkerSender::try_send`].
	pub fn try_send(&self, id: MsgId, args: A) -> Result<()> {
		self.sender.try_send(id, args)
	}

	/// Registers with the monitor and spawns the loop on its own thread.
	///
	/// Returns once the thread is spawned.
	pub fn start(&self) -> Result<()> {
		let mut pending = self.pending.lock();
		if pending.is_none() {
			return Err(Error::AlreadyStarted(self.name.clone()));
		}
		if self.is_stopped() {
			return Err(Error::WorkerStopped);
		}

		if let Err(err) = self.monitor.register(&self.name, self.offline_callback()) {
			tracing::error!(worker = %self.name, error = %err, "register worker to monitor failed");
			return Err(err);
		}

		let Some(state) = pending.take() else {
			unreachable!("checked above while holding the lock");
		};
		let (name, monitor) = (self.name.clone(), self.monitor.clone());
		match crate::spawn::spawn_loop_thread(format!("sw-{}", self.name), move || run_loop(name, monitor, state)) {
			Ok(exit) => {
				let _ = self.exit.set(exit);
				tracing::info!(worker = %self.name, "worker.start");
				Ok(())
			}
			Err(err) => {
				self.monitor.unregister(&self.name);
				self.mark_stopped();
				tracing::error!(worker = %self.name, error = %err, "worker loop thread spawn failed");
				Err(Error::Spawn {
					worker: self.name.clone(),
					reason: err.to_string(),
				})
			}
		}
	}

	/// Stops accepting messages, lets the loop drain what is queued, and waits
	/// for it to exit. Safe to call more than once and from several tasks.
	pub async fn close(&self) {
		self.mark_stopped();
		if let Some(exit) = self.exit.get() {
			exit.join().await;
		}
		tracing::info!(worker = %self.name, "worker.close");
	}

	/// Like [`Worker::close`] but stops waiting after `timeout`.
	///
	/// Returns `true` if the loop exited in time.
	pub async fn close_timeout(&self, timeout: Duration) -> bool {
		self.mark_stopped();
		let Some(exit) = self.exit.get() else {
			return true;
		};
		let exited = exit.join_with_timeout(timeout).await;
		if !exited {
			tracing::warn!(worker = %self.name, ?timeout, "worker close timed out");
		}
		exited
	}

	fn mark_stopped(&self) {
		self.sender.stopped.store(true, Ordering::Release);
		self.sender.tx.close();
	}

	fn offline_callback(&self) -> impl Fn() + Send + Sync + 'static {
		let name = self.name.clone();
		let in_flight = self.in_flight.clone();
		let extra = self.on_timeout.clone();
		move || {
			match in_flight.get() {
				Some(current) => tracing::error!(worker = %name, %current, "worker may be offline"),
				None => tracing::error!(worker = %name, "worker may be offline"),
			}
			if let Some(extra) = &extra {
				extra();
			}
		}
	}
}

async fn run_loop<A>(name: String, monitor: Monitor, state: LoopState<A>)
where
	A: fmt::Debug + Send + 'static,
{
	let LoopState {
		rx,
		mut router,
		mut loop_hook,
		before_loop,
		after_loop,
		policy,
	} = state;

	if let Some(hook) = before_loop {
		protect_run("before_loop", hook);
	}

	let mut ticker = tokio::time::interval_at(Instant::now() + policy.loop_interval, policy.loop_interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		let seed = tokio::select! {
			biased;
			msg = rx.recv() => match msg {
				Some(msg) => vec![msg],
				None => break,
			},
			_ = ticker.tick() => Vec::new(),
		};

		let (batch, closed) = policy.fetch_more(&rx, seed);
		protect_run("loop_hook", || loop_hook());
		router.process(batch);
		monitor.report(&name);

		if closed {
			break;
		}
	}

	if let Some(hook) = after_loop {
		protect_run("after_loop", hook);
	}
	tracing::info!(worker = %name, "worker.exit");
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests;
