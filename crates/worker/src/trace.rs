//! Correlation ids attached to every message.
//!
//! A trace id is either a single fresh segment or a two-segment chain
//! `root.child`. Deriving from a parent keeps only the parent's root, so a
//! causal chain hopping through several workers never grows past two segments.

use std::fmt;
use std::sync::Arc;

const SEPARATOR: char = '.';
const SEGMENT_LEN: usize = 16;

/// Correlation string carried by a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(Arc<str>);

impl TraceId {
	/// Generates a fresh 16-character id.
	pub fn generate() -> Self {
		Self(Arc::from(new_segment()))
	}

	/// Derives the id for a message caused by `parent`.
	///
	/// Without a parent this is [`TraceId::generate`].
	pub fn derive(parent: Option<&TraceId>) -> Self {
		let Some(parent) = parent else {
			return Self::generate();
		};
		let root = parent.root();
		Self(Arc::from(format!("{root}{SEPARATOR}{}", new_segment())))
	}

	/// First segment of the chain.
	pub fn root(&self) -> &str {
		self.0.split(SEPARATOR).next().unwrap_or(&self.0)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for TraceId {
	fn from(value: &str) -> Self {
		Self(Arc::from(value))
	}
}

impl From<String> for TraceId {
	fn from(value: String) -> Self {
		Self(Arc::from(value))
	}
}

impl fmt::Display for TraceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

fn new_segment() -> String {
	let mut id = uuid::Uuid::new_v4().simple().to_string();
	id.truncate(SEGMENT_LEN);
	id
}
