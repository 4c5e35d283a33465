//! Where the output of running jobs goes.

use std::sync::{Mutex, PoisonError};

pub trait OutputSink: Send + Sync {
	/// Called before every job.
	fn reset(&self);
	fn line(&self, line: &str);
}

/// Forwards output to the `emerge` log target.
#[derive(Debug, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
	fn reset(&self) {}

	fn line(&self, line: &str) {
		log::info!(target: "emerge", "{}", line);
	}
}

/// Keeps the output of the current job in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
	lines: Mutex<Vec<String>>,
	resets: Mutex<usize>,
}

impl MemorySink {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn lines(&self) -> Vec<String> {
		self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	pub fn resets(&self) -> usize {
		*self.resets.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl OutputSink for MemorySink {
	fn reset(&self) {
		self.lines.lock().unwrap_or_else(PoisonError::into_inner).clear();
		*self.resets.lock().unwrap_or_else(PoisonError::into_inner) += 1;
	}

	fn line(&self, line: &str) {
		self.lines.lock().unwrap_or_else(PoisonError::into_inner).push(line.to_string());
	}
}
