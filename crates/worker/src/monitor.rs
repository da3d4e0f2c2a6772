//! Liveness watchdog shared by all workers of a process.
//!
//! Every registered name owns a missed-tick counter. A background ticker bumps
//! all counters once per interval; a worker resets its own counter after each
//! loop iteration. Once a counter exceeds the configured threshold the
//! worker's timeout callback fires, and keeps firing on every tick until the
//! worker reports again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::protect::protect_run;

/// Callback invoked when a registered worker misses too many ticks.
pub type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;

struct Liveness {
	missed_ticks: AtomicU32,
	on_timeout: TimeoutCallback,
}

type Registry = Arc<RwLock<HashMap<String, Arc<Liveness>>>>;

struct MonitorInner {
	registry: Registry,
	cancel: CancellationToken,
	config: MonitorConfig,
}

impl Drop for MonitorInner {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

/// Cloneable handle to one liveness watchdog.
///
/// The ticker stops on [`Monitor::stop`] or when the last handle is dropped.
#[derive(Clone)]
pub struct Monitor {
	inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for Monitor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Monitor")
			.field("workers", &self.len())
			.field("config", &self.inner.config)
			.field("stopped", &self.is_stopped())
			.finish()
	}
}

impl Monitor {
	/// Creates a monitor and spawns its ticker. The first tick lands one
	/// interval after start.
	pub fn start(config: MonitorConfig) -> Self {
		let registry: Registry = Arc::default();
		let cancel = CancellationToken::new();
		crate::spawn::spawn("monitor", run_ticker(Arc::clone(&registry), cancel.clone(), config.clone()));
		tracing::debug!(tick_ms = config.tick_interval_ms, timeout_ticks = config.timeout_ticks, "worker.monitor.start");
		Self {
			inner: Arc::new(MonitorInner { registry, cancel, config }),
		}
	}

	pub fn config(&self) -> &MonitorConfig {
		&self.inner.config
	}

	/// Registers `name` with a zeroed counter.
	pub fn register(&self, name: impl Into<String>, on_timeout: impl Fn() + Send + Sync + 'static) -> Result<()> {
		let name = name.into();
		let mut registry = self.inner.registry.write();
		if registry.contains_key(&name) {
			return Err(Error::AlreadyRegistered(name));
		}
		registry.insert(
			name,
			Arc::new(Liveness {
				missed_ticks: AtomicU32::new(0),
				on_timeout: Arc::new(on_timeout),
			}),
		);
		Ok(())
	}

	/// Removes `name`, returning whether it was registered.
	pub(crate) fn unregister(&self, name: &str) -> bool {
		self.inner.registry.write().remove(name).is_some()
	}

	/// Resets the counter for `name`. Unknown names are ignored.
	pub fn report(&self, name: &str) {
		if let Some(liveness) = self.inner.registry.read().get(name) {
			liveness.missed_ticks.store(0, Ordering::Release);
		}
	}

	/// Ticks missed by `name` since its last report.
	pub fn missed_ticks(&self, name: &str) -> Option<u32> {
		self.inner.registry.read().get(name).map(|l| l.missed_ticks.load(Ordering::Acquire))
	}

	pub fn contains(&self, name: &str) -> bool {
		self.inner.registry.read().contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.inner.registry.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Registered names, sorted.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<_> = self.inner.registry.read().keys().cloned().collect();
		names.sort();
		names
	}

	/// Stops the ticker. Timeout callbacks already dispatched are not cancelled.
	pub fn stop(&self) {
		if !self.inner.cancel.is_cancelled() {
			tracing::info!("worker.monitor.stop");
		}
		self.inner.cancel.cancel();
	}

	pub fn is_stopped(&self) -> bool {
		self.inner.cancel.is_cancelled()
	}

	/// Waits for Ctrl-C, SIGTERM or SIGQUIT and stops the monitor.
	///
	/// Returns early if the monitor is stopped by other means.
	pub async fn stop_on_signal(&self) -> std::io::Result<()> {
		tokio::select! {
			_ = self.inner.cancel.cancelled() => return Ok(()),
			res = shutdown_signal() => res?,
		}
		tracing::info!("worker.monitor.signal");
		self.stop();
		Ok(())
	}
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut term = signal(SignalKind::terminate())?;
	let mut quit = signal(SignalKind::quit())?;
	tokio::select! {
		res = tokio::signal::ctrl_c() => res,
		_ = term.recv() => Ok(()),
		_ = quit.recv() => Ok(()),
	}
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
	tokio::signal::ctrl_c().await
}

async fn run_ticker(registry: Registry, cancel: CancellationToken, config: MonitorConfig) {
	let period = config.tick_interval();
	let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			_ = ticker.tick() => tick(&registry, config.timeout_ticks),
		}
	}
	tracing::debug!("worker.monitor.exit");
}

fn tick(registry: &Registry, timeout_ticks: u32) {
	let expired: Vec<(String, u32, TimeoutCallback)> = registry
		.read()
		.iter()
		.filter_map(|(name, liveness)| {
			let missed = liveness.missed_ticks.fetch_add(1, Ordering::AcqRel).saturating_add(1);
			(missed > timeout_ticks).then(|| (name.clone(), missed, Arc::clone(&liveness.on_timeout)))
		})
		.collect();

	// Callbacks run off the ticker so a blocking one cannot stall the sweep.
	for (name, missed, on_timeout) in expired {
		tracing::trace!(worker = %name, missed, "worker.monitor.timeout");
		drop(crate::spawn::spawn_blocking("monitor.timeout", move || {
			protect_run("timeout callback", || on_timeout());
		}));
	}
}
