//! Message id → handler dispatch.
//!
//! A [`Router`] is wired once before its worker starts and is then owned by
//! the worker loop, so the handler table is never touched concurrently.
//! Batches are executed strictly in order; each handler call is isolated from
//! panics and timed against a slow-call threshold.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::protect::protect_run;
use crate::trace::TraceId;

/// Numeric message identifier used for routing.
pub type MsgId = u32;

/// Handler calls slower than this are logged unless configured otherwise.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(20);

/// One queued message.
#[derive(Debug, Clone)]
pub struct Msg<A> {
	id: MsgId,
	args: A,
	trace_id: TraceId,
}

impl<A> Msg<A> {
	pub fn new(id: MsgId, args: A, trace_id: TraceId) -> Self {
		Self { id, args, trace_id }
	}

	pub fn id(&self) -> MsgId {
		self.id
	}

	pub fn args(&self) -> &A {
		&self.args
	}

	pub fn trace_id(&self) -> &TraceId {
		&self.trace_id
	}
}

/// Per-call context handed to a handler alongside the message payload.
#[derive(Debug)]
pub struct MsgContext<'a> {
	worker: &'a str,
	id: MsgId,
	trace_id: &'a TraceId,
}

impl<'a> MsgContext<'a> {
	/// Name of the worker running the handler.
	pub fn worker(&self) -> &'a str {
		self.worker
	}

	pub fn id(&self) -> MsgId {
		self.id
	}

	/// Trace id of the message; pass it to `send_traced` to continue the chain.
	pub fn trace_id(&self) -> &'a TraceId {
		self.trace_id
	}
}

type Handler<A> = Box<dyn FnMut(&MsgContext<'_>, A) + Send>;

/// Snapshot of the message a router is currently executing.
#[derive(Debug, Clone)]
pub struct InFlight {
	pub id: MsgId,
	pub trace_id: TraceId,
	pub started: Instant,
	/// `Debug` rendering of the payload, present when the router captures args.
	pub args: Option<String>,
}

impl InFlight {
	pub fn elapsed(&self) -> Duration {
		self.started.elapsed()
	}
}

impl fmt::Display for InFlight {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "msg:{{id:{}, traceId:{}", self.id, self.trace_id)?;
		if let Some(args) = &self.args {
			write!(f, ", args:{args}")?;
		}
		write!(f, "}} running for {:?}", self.elapsed())
	}
}

/// Shared slot holding the in-flight message, read by liveness callbacks.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlightSlot(Arc<Mutex<Option<InFlight>>>);

impl InFlightSlot {
	fn set(&self, current: InFlight) {
		*self.0.lock() = Some(current);
	}

	fn clear(&self) {
		*self.0.lock() = None;
	}

	pub(crate) fn get(&self) -> Option<InFlight> {
		self.0.lock().clone()
	}
}

/// Message router owned by one worker.
pub struct Router<A> {
	worker: String,
	handlers: HashMap<MsgId, Handler<A>>,
	/// `None` until set explicitly or by the owning worker's config.
	slow_threshold: Option<Duration>,
	capture_args: bool,
	in_flight: InFlightSlot,
}

impl<A> Default for Router<A>
where
	A: fmt::Debug + Send + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<A> fmt::Debug for Router<A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut ids: Vec<_> = self.handlers.keys().copied().collect();
		ids.sort_unstable();
		f.debug_struct("Router")
			.field("worker", &self.worker)
			.field("ids", &ids)
			.field("slow_threshold", &self.slow_threshold)
			.field("capture_args", &self.capture_args)
			.finish()
	}
}

impl<A> Router<A>
where
	A: fmt::Debug + Send + 'static,
{
	/// Creates an empty router. Its slow-call threshold comes from the
	/// worker's [`WorkerConfig`], or [`DEFAULT_SLOW_THRESHOLD`].
	pub fn new() -> Self {
		Self::with_slow_threshold(Duration::ZERO)
	}

	/// Creates an empty router with a fixed slow-call threshold. Zero leaves it
	/// unset, as [`Router::new`] does.
	pub fn with_slow_threshold(slow_threshold: Duration) -> Self {
		Self {
			worker: String::new(),
			handlers: HashMap::new(),
			slow_threshold: (!slow_threshold.is_zero()).then_some(slow_threshold),
			capture_args: false,
			in_flight: InFlightSlot::default(),
		}
	}

	/// Creates an empty router using the configured slow-call threshold.
	pub fn from_config(config: &WorkerConfig) -> Self {
		Self::with_slow_threshold(config.slow_call())
	}

	/// Records a `Debug` rendering of each payload while it executes, so
	/// liveness reports can show the arguments of a stuck message.
	#[must_use]
	pub fn capture_args(mut self, enabled: bool) -> Self {
		self.capture_args = enabled;
		self
	}

	/// Registers the handler for `id`.
	///
	/// A duplicate id is a fatal wiring error ([`Error::is_fatal`]).
	pub fn register(&mut self, id: MsgId, handler: impl FnMut(&MsgContext<'_>, A) + Send + 'static) -> Result<&mut Self> {
		if self.handlers.contains_key(&id) {
			tracing::error!(msg_id = id, "worker router register repeated");
			return Err(Error::DuplicateHandler(id));
		}
		self.handlers.insert(id, Box::new(handler));
		Ok(self)
	}

	/// Chaining form of [`Router::register`] for static wiring.
	///
	/// # Panics
	///
	/// Panics if a handler for `id` already exists.
	#[must_use]
	pub fn handle(mut self, id: MsgId, handler: impl FnMut(&MsgContext<'_>, A) + Send + 'static) -> Self {
		if let Err(err) = self.register(id, handler) {
			panic!("{err}");
		}
		self
	}

	pub fn contains(&self, id: MsgId) -> bool {
		self.handlers.contains_key(&id)
	}

	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}

	pub fn slow_threshold(&self) -> Duration {
		self.slow_threshold.unwrap_or(DEFAULT_SLOW_THRESHOLD)
	}

	/// Message currently executing, if any.
	pub fn current(&self) -> Option<InFlight> {
		self.in_flight.get()
	}

	/// Attaches the router to its worker. `slow_call` applies only when no
	/// threshold was set on the router itself.
	pub(crate) fn bind(&mut self, worker: &str, slow_call: Duration) {
		self.worker = worker.to_string();
		if self.slow_threshold.is_none() && !slow_call.is_zero() {
			self.slow_threshold = Some(slow_call);
		}
	}

	pub(crate) fn in_flight(&self) -> InFlightSlot {
		self.in_flight.clone()
	}

	/// Executes a batch in order.
	///
	/// Ids without a handler are skipped. A panicking handler is logged and
	/// the next message proceeds.
	pub fn process(&mut self, batch: Vec<Msg<A>>) {
		let slow_threshold = self.slow_threshold();
		for Msg { id, args, trace_id } in batch {
			let started = Instant::now();
			if let Some(handler) = self.handlers.get_mut(&id) {
				self.in_flight.set(InFlight {
					id,
					trace_id: trace_id.clone(),
					started,
					args: self.capture_args.then(|| format!("{args:?}")),
				});

				let span = tracing::debug_span!("worker.msg", worker = %self.worker, msg_id = id, trace_id = %trace_id);
				let _enter = span.enter();
				let ctx = MsgContext {
					worker: &self.worker,
					id,
					trace_id: &trace_id,
				};
				protect_run("handler", || handler(&ctx, args));
				self.in_flight.clear();
			}

			let cost = started.elapsed();
			if cost > slow_threshold {
				tracing::debug!(worker = %self.worker, msg_id = id, ?cost, "worker.msg.slow");
			}
		}
	}
}
