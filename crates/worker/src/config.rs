//! Tunables for workers and the liveness monitor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Mailbox capacity used when none (or zero) is configured.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 50_000;

/// Worker loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
	/// Bounded mailbox capacity. Zero falls back to [`DEFAULT_MAILBOX_CAPACITY`].
	#[serde(default = "default_mailbox_capacity")]
	pub mailbox_capacity: usize,
	/// Period of the idle tick that drives the loop hook without traffic.
	#[serde(default = "default_loop_interval_ms")]
	pub loop_interval_ms: u64,
	/// Upper bound on time spent collecting one batch.
	#[serde(default = "default_batch_max_wait_ms")]
	pub batch_max_wait_ms: u64,
	/// Handler calls slower than this are logged. Applied to the worker's
	/// router unless the router was given its own threshold.
	#[serde(default = "default_slow_call_ms")]
	pub slow_call_ms: u64,
}

fn default_mailbox_capacity() -> usize {
	DEFAULT_MAILBOX_CAPACITY
}

fn default_loop_interval_ms() -> u64 {
	10
}

fn default_batch_max_wait_ms() -> u64 {
	5
}

fn default_slow_call_ms() -> u64 {
	20
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			mailbox_capacity: default_mailbox_capacity(),
			loop_interval_ms: default_loop_interval_ms(),
			batch_max_wait_ms: default_batch_max_wait_ms(),
			slow_call_ms: default_slow_call_ms(),
		}
	}
}

impl WorkerConfig {
	pub fn loop_interval(&self) -> Duration {
		Duration::from_millis(self.loop_interval_ms.max(1))
	}

	pub fn batch_max_wait(&self) -> Duration {
		Duration::from_millis(self.batch_max_wait_ms)
	}

	pub fn slow_call(&self) -> Duration {
		Duration::from_millis(self.slow_call_ms)
	}
}

/// Liveness monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
	/// Ticker period; every registered counter is bumped once per tick.
	#[serde(default = "default_tick_interval_ms")]
	pub tick_interval_ms: u64,
	/// A worker whose counter exceeds this many ticks is reported offline.
	#[serde(default = "default_timeout_ticks")]
	pub timeout_ticks: u32,
}

fn default_tick_interval_ms() -> u64 {
	1000
}

fn default_timeout_ticks() -> u32 {
	5
}

impl Default for MonitorConfig {
	fn default() -> Self {
		Self {
			tick_interval_ms: default_tick_interval_ms(),
			timeout_ticks: default_timeout_ticks(),
		}
	}
}

impl MonitorConfig {
	pub fn tick_interval(&self) -> Duration {
		Duration::from_millis(self.tick_interval_ms.max(1))
	}
}
