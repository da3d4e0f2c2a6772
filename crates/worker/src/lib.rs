//! Single-threaded actor workers.
//!
//! A [`Worker`] owns a bounded [`mailbox`] and one serial loop that drains it
//! in time-bounded batches, dispatching every message through a [`Router`].
//! Handler and hook panics are isolated and logged. Every worker registers
//! with a [`Monitor`], a watchdog that fires a callback when a worker stops
//! reporting progress.
//!
//! ```no_run
//! # async fn demo() -> safeworker::Result<()> {
//! use safeworker::{Monitor, MonitorConfig, Router, Worker};
//!
//! let monitor = Monitor::start(MonitorConfig::default());
//! let router = Router::new().handle(1, |ctx, name: String| {
//! 	tracing::info!(trace_id = %ctx.trace_id(), "hello {name}");
//! });
//! let worker = Worker::builder("greeter", &monitor).router(router).loop_hook(|| {}).build()?;
//! worker.start()?;
//! worker.send(1, "world".to_string()).await;
//! worker.close().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod join;
pub mod mailbox;
mod monitor;
mod protect;
mod router;
mod spawn;
mod trace;
mod worker;

pub use config::{DEFAULT_MAILBOX_CAPACITY, MonitorConfig, WorkerConfig};
pub use error::{Error, Result};
pub use monitor::{Monitor, TimeoutCallback};
pub use protect::protect_run;
pub use router::{DEFAULT_SLOW_THRESHOLD, InFlight, Msg, MsgContext, MsgId, Router};
pub use trace::TraceId;
pub use worker::{Worker, WorkerBuilder, WorkerSender};
