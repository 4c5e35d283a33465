//! Various helper functions for testing
//!
//! functions in this module should use results and not use any panics to avoid confusion in callers

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use emerge_rs::catalog::MemoryCatalog;
use emerge_rs::overlay::{ConfigEntry, ConfigStore, FsConfigStore, StagedFile};
use emerge_rs::package::{DependencyAtom, ParseError};
use emerge_rs::progress::ActiveUnitProbe;
use emerge_rs::{Config, PackageRecord, PackageRef, PendingOverlay};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("emerge-rs error: {0}")]
	EmergeRs(#[from] emerge_rs::Error),
	#[error("parse error: {0}")]
	Parse(#[from] ParseError),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Record for `package` depending on `depends`, each written as a dependency atom.
pub fn record(package: &str, depends: &[&str]) -> Result<PackageRecord> {
	let mut record = PackageRecord::new(PackageRef::parse(package)?);
	record.depends = depends.iter().map(|d| DependencyAtom::parse(d)).collect::<std::result::Result<_, _>>()?;
	Ok(record)
}

/// Like [`record()`] but already installed.
pub fn installed(package: &str, depends: &[&str]) -> Result<PackageRecord> {
	let mut record = record(package, depends)?;
	record.installed = true;
	Ok(record)
}

pub fn catalog(records: impl IntoIterator<Item = PackageRecord>) -> Arc<MemoryCatalog> {
	Arc::new(MemoryCatalog::new(records))
}

/// Merge command running `script` with `sh`, the job's arguments end up in `$@`.
pub fn sh_command(script: &str) -> Vec<String> {
	vec!["sh".to_string(), "-c".to_string(), script.to_string(), "emerge".to_string()]
}

/// A throwaway configuration root, removed when dropped.
#[derive(Debug)]
pub struct ConfigRoot {
	dir: tempfile::TempDir,
	config: Config,
}

impl ConfigRoot {
	/// Fast polling, short kill grace and a merge command that succeeds without doing anything.
	pub fn new() -> Result<Self> {
		let dir = tempfile::tempdir()?;
		let config = Config {
			config_root: dir.path().to_path_buf(),
			merge_command: sh_command("exit 0"),
			sync_command: sh_command("exit 0"),
			poll_interval_ms: 10,
			kill_grace_ms: 200,
			..Default::default()
		};
		Ok(Self { dir, config })
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn config_mut(&mut self) -> &mut Config {
		&mut self.config
	}

	pub fn path(&self) -> &Path {
		self.dir.path()
	}

	/// Writes `contents` to `relative`, creating parent directories.
	pub fn write(&self, relative: impl AsRef<Path>, contents: &str) -> Result<PathBuf> {
		let path = self.dir.path().join(relative);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(&path, contents)?;
		Ok(path)
	}

	pub fn read(&self, relative: impl AsRef<Path>) -> Result<String> {
		Ok(std::fs::read_to_string(self.dir.path().join(relative))?)
	}

	/// Overlay editing the files below this root.
	pub fn overlay(&self) -> PendingOverlay {
		PendingOverlay::new(self.config.clone(), FsConfigStore::new())
	}

	/// Overlay whose store fails to replace files named `file_name` while the returned switch is on.
	pub fn failing_overlay(&self, file_name: &str) -> (PendingOverlay, Arc<AtomicBool>) {
		let failing = Arc::new(AtomicBool::new(true));
		let store = FailingStore { inner: FsConfigStore::new(), file_name: file_name.to_string(), failing: failing.clone() };
		(PendingOverlay::new(self.config.clone(), store), failing)
	}
}

/// Filesystem store that refuses to persist one file.
#[derive(Debug)]
struct FailingStore {
	inner: FsConfigStore,
	file_name: String,
	failing: Arc<AtomicBool>,
}

impl ConfigStore for FailingStore {
	fn find_entries(&self, package: &PackageRef, path: &Path) -> std::io::Result<Vec<ConfigEntry>> {
		self.inner.find_entries(package, path)
	}

	fn read_lines(&self, file: &Path) -> std::io::Result<Vec<String>> {
		self.inner.read_lines(file)
	}

	fn stage(&self, file: &Path, lines: &[String]) -> std::io::Result<Box<dyn StagedFile>> {
		let staged = self.inner.stage(file, lines)?;
		let refuse = self.failing.load(Ordering::SeqCst)
			&& file.file_name().map_or(false, |n| n.to_string_lossy() == self.file_name);
		if refuse {
			Ok(Box::new(RefusedFile))
		} else {
			Ok(staged)
		}
	}
}

struct RefusedFile;

impl StagedFile for RefusedFile {
	fn persist(self: Box<Self>) -> std::io::Result<()> {
		Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "refusing to write"))
	}
}

/// Probe replaying a fixed sequence of answers, idle once they run out.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
	answers: Mutex<VecDeque<Option<String>>>,
	calls: Mutex<usize>,
}

impl ScriptedProbe {
	pub fn new<'a>(answers: impl IntoIterator<Item = Option<&'a str>>) -> Self {
		Self {
			answers: Mutex::new(answers.into_iter().map(|a| a.map(str::to_string)).collect()),
			calls: Mutex::new(0),
		}
	}

	pub fn calls(&self) -> usize {
		*self.calls.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl ActiveUnitProbe for ScriptedProbe {
	fn current_unit(&self) -> std::io::Result<Option<String>> {
		*self.calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
		Ok(self.answers.lock().unwrap_or_else(PoisonError::into_inner).pop_front().flatten())
	}
}
