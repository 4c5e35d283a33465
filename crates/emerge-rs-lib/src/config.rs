//! User configuration.
//!
//! Stored as JSON in the XDG config directory, every field falls back to a default when missing.

use std::path::{Path, PathBuf};
use serde::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Root of the package manager configuration, holds `package.use` and friends.
	pub config_root: PathBuf,
	/// File name used when `package.use` is a directory.
	pub use_file: String,
	/// File name used when `package.mask`/`package.unmask` are directories.
	pub mask_file: String,
	/// File name used when `package.keywords` is a directory.
	pub testing_file: String,
	pub use_per_version: bool,
	pub mask_per_version: bool,
	pub testing_per_version: bool,
	/// Architecture keyword written for testing overrides, without the `~`.
	pub arch: String,
	/// Program and leading arguments for merge, unmerge and update runs.
	pub merge_command: Vec<String>,
	/// Sync command line, `&&` separates commands run one after another.
	pub sync_command: Vec<String>,
	/// Program reporting the unit the package manager is working on.
	pub probe_command: Vec<String>,
	pub poll_interval_ms: u64,
	/// Time a process group gets to exit after `SIGTERM` before it is killed.
	pub kill_grace_ms: u64,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			config_root: PathBuf::from("/etc/portage"),
			use_file: "emerge-rs".to_string(),
			mask_file: "emerge-rs".to_string(),
			testing_file: "emerge-rs".to_string(),
			use_per_version: true,
			mask_per_version: true,
			testing_per_version: true,
			arch: "amd64".to_string(),
			merge_command: vec!["/usr/bin/emerge".to_string()],
			sync_command: vec!["emerge".to_string(), "--sync".to_string()],
			probe_command: ["qlop", "--current", "--nocolor", "--quiet"].iter().map(|s| s.to_string()).collect(),
			poll_interval_ms: 2000,
			kill_grace_ms: 500,
		}
	}
}

impl Config {
	/// Directory holding the configuration file.
	///
	/// Returns `None` when neither `XDG_CONFIG_HOME` nor `HOME` are set.
	pub fn config_dir() -> Option<PathBuf> {
		let base = if let Ok(e) = std::env::var("XDG_CONFIG_HOME") {
			PathBuf::from(e)
		} else {
			PathBuf::from(std::env::var("HOME").ok()?).join(".config")
		};
		Some(base.join("emerge-rs"))
	}

	fn default_path() -> crate::Result<PathBuf> {
		Self::config_dir()
			.map(|d| d.join("config.json"))
			.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no configuration directory, HOME is not set").into())
	}

	/// Loads the config from the default location.
	///
	/// # Errors
	/// - [`IO`](crate::error::Error::IO) when opening or reading from the file.
	/// - [`SerdeJSON`](crate::error::Error::SerdeJSON) when deserializing the file.
	pub fn load_from_disk() -> crate::Result<Self> {
		Self::load_from_file(Self::default_path()?)
	}

	pub fn load_from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
		let file = std::fs::File::open(path)?;
		Ok(serde_json::from_reader(file)?)
	}

	/// Saves the config to the default location, creating parent directories as needed.
	///
	/// # Errors
	/// - [`IO`](crate::error::Error::IO) when opening the file, writing to it or creating it's parent directories.
	/// - [`SerdeJSON`](crate::error::Error::SerdeJSON) when serializing.
	pub fn save_to_disk(&self) -> crate::Result<()> {
		self.save_to_file(Self::default_path()?)
	}

	pub fn save_to_file(&self, path: impl AsRef<Path>) -> crate::Result<()> {
		let path = path.as_ref();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let file = std::fs::File::create(path)?;
		serde_json::to_writer_pretty(file, self)?;
		Ok(())
	}

	pub fn use_path(&self) -> PathBuf {
		self.config_root.join("package.use")
	}

	pub fn mask_path(&self) -> PathBuf {
		self.config_root.join("package.mask")
	}

	pub fn unmask_path(&self) -> PathBuf {
		self.config_root.join("package.unmask")
	}

	pub fn testing_path(&self) -> PathBuf {
		self.config_root.join("package.keywords")
	}

	pub fn poll_interval(&self) -> std::time::Duration {
		std::time::Duration::from_millis(self.poll_interval_ms)
	}

	pub fn kill_grace(&self) -> std::time::Duration {
		std::time::Duration::from_millis(self.kill_grace_ms)
	}

	/// Splits the sync command on `&&` into separate command lines.
	pub fn sync_commands(&self) -> Vec<Vec<String>> {
		self.sync_command
			.split(|arg| arg == "&&")
			.filter(|cmd| !cmd.is_empty())
			.map(|cmd| cmd.to_vec())
			.collect()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn missing_fields_use_defaults() {
		let config: Config = serde_json::from_str(r#"{"config_root": "/tmp/portage", "arch": "x86"}"#).unwrap();
		assert_eq!(config.config_root, PathBuf::from("/tmp/portage"));
		assert_eq!(config.arch, "x86");
		assert_eq!(config.poll_interval_ms, 2000);
		assert_eq!(config.use_path(), PathBuf::from("/tmp/portage/package.use"));
	}

	#[test]
	fn sync_command_split() {
		let config = Config {
			sync_command: ["eix-sync", "&&", "layman", "-S"].iter().map(|s| s.to_string()).collect(),
			..Default::default()
		};
		assert_eq!(config.sync_commands(), vec![vec!["eix-sync".to_string()], vec!["layman".to_string(), "-S".to_string()]]);
		assert_eq!(Config::default().sync_commands().len(), 1);
	}

	#[test]
	fn save_and_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("config.json");
		let config = Config { kill_grace_ms: 50, ..Default::default() };
		config.save_to_file(&path).unwrap();
		assert_eq!(Config::load_from_file(&path).unwrap(), config);
	}
}
