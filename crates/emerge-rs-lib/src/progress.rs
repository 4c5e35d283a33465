//! Follows a running merge and reports each unit once the package manager moved past it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::catalog::PackageCatalog;
use crate::executor::JobId;
use crate::operation_tree::{OperationTree, QueueKind};
use crate::package::{PackageRef, Specifier};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
	#[error("probe reported unparsable unit `{0}`")]
	Unparsable(String),
	#[error("no known package matches unit `{0}`")]
	Unknown(String),
}

/// Asks the system which unit the package manager is currently working on.
pub trait ActiveUnitProbe: Send + Sync {
	/// `category/name-version` of the active unit, `None` when idle.
	fn current_unit(&self) -> std::io::Result<Option<String>>;
}

/// Probe running `qlop --current` or a compatible command.
#[derive(Debug, Clone)]
pub struct QlopProbe {
	command: Vec<String>,
}

impl QlopProbe {
	pub fn new(command: Vec<String>) -> Self {
		Self { command }
	}

	/// Picks the unit out of lines like ` * app-misc/foo-1.0`.
	pub fn parse_output(output: &str) -> Option<String> {
		output.lines()
			.filter_map(|line| line.trim().strip_prefix('*'))
			.filter_map(|rest| rest.split_whitespace().next())
			.map(str::to_string)
			.next()
	}
}

impl ActiveUnitProbe for QlopProbe {
	fn current_unit(&self) -> std::io::Result<Option<String>> {
		let Some((program, args)) = self.command.split_first() else {
			return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty probe command"))
		};
		let output = std::process::Command::new(program).args(args).output()?;
		Ok(Self::parse_output(&String::from_utf8_lossy(&output.stdout)))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
	/// The package manager moved on from `unit`.
	UnitFinished { job: JobId, unit: String },
}

/// Background poll loop for one job.
///
/// Dropping the tracker ends the loop the same way [`stop()`](ProgressTracker::stop) does.
#[derive(Debug)]
pub struct ProgressTracker {
	job: JobId,
	stop: Option<oneshot::Sender<()>>,
}

impl ProgressTracker {
	/// Starts polling `probe` every `interval`.
	///
	/// # Panics
	/// When called outside of a tokio runtime.
	pub fn start(job: JobId, probe: Arc<dyn ActiveUnitProbe>, interval: Duration, events: mpsc::UnboundedSender<TrackerEvent>) -> Self {
		let (stop, stop_rx) = oneshot::channel();
		tokio::spawn(poll(job, probe, interval, events, stop_rx));
		log::debug!("Tracking progress of job {}", job);
		Self { job, stop: Some(stop) }
	}

	pub fn job(&self) -> JobId {
		self.job
	}

	/// Ends the poll loop, the unit active at that point is not reported.
	pub fn stop(mut self) {
		if let Some(stop) = self.stop.take() {
			let _ = stop.send(());
		}
		log::debug!("Stopped tracking job {}", self.job);
	}
}

async fn poll(job: JobId, probe: Arc<dyn ActiveUnitProbe>, interval: Duration, events: mpsc::UnboundedSender<TrackerEvent>, mut stop: oneshot::Receiver<()>) {
	let mut ticker = tokio::time::interval(interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	let mut previous: Option<String> = None;

	loop {
		tokio::select! {
			_ = &mut stop => break,
			_ = ticker.tick() => {},
		}

		let probe = probe.clone();
		let current = match tokio::task::spawn_blocking(move || probe.current_unit()).await {
			Ok(Ok(current)) => current,
			Ok(Err(e)) => {
				log::warn!("Progress probe failed: {}", e);
				continue;
			},
			Err(e) => {
				log::warn!("Progress probe panicked: {}", e);
				continue;
			},
		};

		if current == previous {
			continue;
		}
		log::trace!("Active unit changed from {:?} to {:?}", previous, current);
		if let Some(unit) = std::mem::replace(&mut previous, current) {
			if events.send(TrackerEvent::UnitFinished { job, unit }).is_err() {
				break;
			}
		}
	}
}

/// Maps a unit reported by the probe to a package, preferring packages queued under `kind` when ambiguous.
pub fn resolve_unit(catalog: &dyn PackageCatalog, tree: &OperationTree, kind: QueueKind, unit: &str) -> Result<PackageRef, ProbeError> {
	if let Ok(package) = PackageRef::parse(unit) {
		if tree.contains(kind, &package) {
			return Ok(package);
		}
	}

	let specifier = Specifier::parse(unit).map_err(|_| ProbeError::Unparsable(unit.to_string()))?;
	let mut candidates = catalog.find(&specifier, false);
	if candidates.is_empty() {
		candidates = catalog.find(&specifier, true);
	}

	match candidates.iter().find(|c| tree.contains(kind, c)) {
		Some(queued) => Ok(queued.clone()),
		None => candidates.into_iter().next().ok_or_else(|| ProbeError::Unknown(unit.to_string())),
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parse_qlop_output() {
		let output = " * app-misc/foo-1.0 \n     started: Mon Jun  5 10:00:00 2023\n";
		assert_eq!(QlopProbe::parse_output(output), Some("app-misc/foo-1.0".to_string()));
		assert_eq!(QlopProbe::parse_output(""), None);
		assert_eq!(QlopProbe::parse_output("nothing here\n"), None);
	}

	#[test]
	fn empty_command_errors() {
		assert!(QlopProbe::new(Vec::new()).current_unit().is_err());
	}
}
