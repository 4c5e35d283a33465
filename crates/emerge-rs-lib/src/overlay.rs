//! Uncommitted changes to per-package configuration.
//!
//! Edits are kept in memory and point at the exact line they change, or at the file a new line is appended to.
//! Nothing touches the disk until [`PendingOverlay::commit()`] writes every affected file once.

mod store;
pub use store::*;
mod paths;
pub use paths::*;
pub mod patch;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use serde::*;

use crate::Config;
use crate::catalog::{PackageCatalog, PackageRecord};
use crate::package::{PackageRef, Specifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attribute {
	Flag,
	Mask,
	Stability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
	/// `flag`, `+flag` or `-flag`.
	Flag(String),
	/// Masked.
	Mask(bool),
	/// Testing keyword accepted.
	Stability(bool),
}

impl AttributeValue {
	pub fn attribute(&self) -> Attribute {
		match self {
			AttributeValue::Flag(_) => Attribute::Flag,
			AttributeValue::Mask(_) => Attribute::Mask,
			AttributeValue::Stability(_) => Attribute::Stability,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
	/// An existing line, 1-based.
	Line { file: PathBuf, line: usize },
	/// A new line at the end of the file.
	Append { file: PathBuf },
}

impl Location {
	pub fn file(&self) -> &Path {
		match self {
			Location::Line { file, .. } | Location::Append { file } => file,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEdit {
	pub target: PackageRef,
	pub value: AttributeValue,
	pub location: Location,
	/// Removes something from an existing line instead of adding.
	pub is_removal: bool,
}

impl PendingEdit {
	pub fn attribute(&self) -> Attribute {
		self.value.attribute()
	}

	/// File an appended entry of this edit belongs to.
	fn config_file(&self) -> ConfigFile {
		match self.value {
			AttributeValue::Flag(_) => ConfigFile::Use,
			AttributeValue::Mask(true) => ConfigFile::Mask,
			AttributeValue::Mask(false) => ConfigFile::Unmask,
			AttributeValue::Stability(_) => ConfigFile::Testing,
		}
	}

	fn flag_at(&self, location: &Location, token: &str, removal: bool) -> bool {
		self.is_removal == removal
			&& &self.location == location
			&& matches!(&self.value, AttributeValue::Flag(f) if f == token)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
	#[error("failed to access {}: {source}", file.display())]
	Io { file: PathBuf, source: std::io::Error },
	#[error("line {line} of {} no longer exists", file.display())]
	LineOutOfRange { file: PathBuf, line: usize },
}

/// What a commit wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
	pub files: Vec<PathBuf>,
	/// Categories of every committed package, these were reloaded in the catalog.
	pub categories: Vec<String>,
}

fn normalize_flag(flag: &str) -> String {
	flag.trim().trim_start_matches('+').to_string()
}

fn invert_flag(flag: &str) -> String {
	match flag.strip_prefix('-') {
		Some(f) => f.to_string(),
		None => format!("-{}", flag),
	}
}

pub struct PendingOverlay {
	config: Config,
	store: Box<dyn ConfigStore>,
	edits: HashMap<PackageRef, Vec<PendingEdit>>,
	/// Lookup results per package and file, dropped on commit.
	entries: HashMap<(PackageRef, ConfigFile), Vec<ConfigEntry>>,
}

impl std::fmt::Debug for PendingOverlay {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PendingOverlay").field("edits", &self.edits).finish()
	}
}

impl PendingOverlay {
	pub fn new(config: Config, store: impl ConfigStore + 'static) -> Self {
		Self {
			config,
			store: Box::new(store),
			edits: HashMap::new(),
			entries: HashMap::new(),
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Entries in `file` whose criterion selects `package`.
	fn entries(&mut self, package: &PackageRef, file: ConfigFile) -> std::io::Result<Vec<ConfigEntry>> {
		let key = (package.clone(), file);
		if let Some(entries) = self.entries.get(&key) {
			return Ok(entries.clone());
		}

		let found: Vec<ConfigEntry> = self.store.find_entries(package, &file.path(&self.config))?
			.into_iter()
			.filter(|e| match Specifier::parse(&e.criterion) {
				Ok(spec) => spec.matches(package),
				Err(err) => {
					log::warn!("Ignoring line {} of {}: {}", e.line, e.file.display(), err);
					false
				}
			})
			.collect();
		self.entries.insert(key, found.clone());
		Ok(found)
	}

	/// Records a change of one attribute of `package`.
	///
	/// Changes that cancel out an earlier pending change remove it instead, so setting a value and then its
	/// inverse leaves nothing pending.
	///
	/// # Errors
	/// Looking up the existing configuration can fail with an IO error, nothing is recorded then.
	pub fn set(&mut self, package: &PackageRecord, value: AttributeValue) -> std::io::Result<()> {
		log::debug!("Setting {:?} on {}", value, package.package);
		match value {
			AttributeValue::Flag(flag) => self.set_flag(package, &flag)?,
			AttributeValue::Mask(masked) => self.set_masked(package, masked)?,
			AttributeValue::Stability(testing) => self.set_testing(package, testing)?,
		}
		if self.edits.get(&package.package).map_or(false, Vec::is_empty) {
			self.edits.remove(&package.package);
		}
		Ok(())
	}

	fn set_flag(&mut self, package: &PackageRecord, flag: &str) -> std::io::Result<()> {
		let flag = normalize_flag(flag);
		let inverse = invert_flag(&flag);
		let entries = self.entries(&package.package, ConfigFile::Use)?;
		let target_file = ConfigFile::Use.target_file(&self.config, &package.package);
		let bucket = self.edits.entry(package.package.clone()).or_default();

		let new_edit = |location: Location, token: &str, is_removal: bool| PendingEdit {
			target: package.package.clone(),
			value: AttributeValue::Flag(token.to_string()),
			location,
			is_removal,
		};
		let find = |bucket: &Vec<PendingEdit>, location: &Location, token: &str, removal: bool| {
			bucket.iter().position(|e| e.flag_at(location, token, removal))
		};

		/* Set once an existing line decides the edit. */
		let mut handled = false;
		/* The flag was tentatively added to an earlier line, a later line holding the inverse wins. */
		let mut tentative = false;

		for entry in &entries {
			let location = Location::Line { file: entry.file.clone(), line: entry.line };
			let added_inverse = find(bucket, &location, &inverse, false);
			let removed_flag = find(bucket, &location, &flag, true);

			if entry.flags.contains(&inverse) || added_inverse.is_some() || removed_flag.is_some() {
				if tentative {
					bucket.pop();
				}
				if added_inverse.is_none() && removed_flag.is_none() {
					if find(bucket, &location, &inverse, true).is_none() {
						bucket.push(new_edit(location.clone(), &inverse, true));
						/* Dropping the token leaves the flag to the global settings, which may enable it as well */
						if !inverse.starts_with('-') && package.use_enabled.contains(&inverse) {
							bucket.push(new_edit(location, &flag, false));
						}
					}
				} else {
					let mut stale: Vec<usize> = added_inverse.into_iter().chain(removed_flag).collect();
					stale.sort_unstable_by(|a, b| b.cmp(a));
					for i in stale {
						bucket.remove(i);
					}
				}
				handled = true;
				break;
			} else if entry.flags.contains(&flag) {
				if tentative {
					bucket.pop();
				}
				handled = true;
				break;
			} else if !handled {
				if find(bucket, &location, &flag, false).is_none() {
					bucket.push(new_edit(location, &flag, false));
					tentative = true;
				}
				handled = true;
			}
		}

		if !handled {
			let location = Location::Append { file: target_file };
			if let Some(i) = find(bucket, &location, &inverse, false) {
				bucket.remove(i);
			} else if find(bucket, &location, &flag, false).is_none() {
				bucket.push(new_edit(location, &flag, false));
			}
		}
		Ok(())
	}

	fn set_masked(&mut self, package: &PackageRecord, masked: bool) -> std::io::Result<()> {
		if let Some(bucket) = self.edits.get_mut(&package.package) {
			bucket.retain(|e| e.attribute() != Attribute::Mask);
		}
		if package.masked == masked {
			return Ok(());
		}

		/* Undo the opposite entries first, only add a line of our own when there are none. */
		let (opposite, target) = if masked {
			(ConfigFile::Unmask, ConfigFile::Mask)
		} else {
			(ConfigFile::Mask, ConfigFile::Unmask)
		};
		let entries = self.entries(&package.package, opposite)?;
		let new: Vec<PendingEdit> = if entries.is_empty() {
			vec![PendingEdit {
				target: package.package.clone(),
				value: AttributeValue::Mask(masked),
				location: Location::Append { file: target.target_file(&self.config, &package.package) },
				is_removal: false,
			}]
		} else {
			entries.into_iter().map(|e| PendingEdit {
				target: package.package.clone(),
				value: AttributeValue::Mask(masked),
				location: Location::Line { file: e.file, line: e.line },
				is_removal: true,
			}).collect()
		};
		self.edits.entry(package.package.clone()).or_default().extend(new);
		Ok(())
	}

	fn set_testing(&mut self, package: &PackageRecord, testing: bool) -> std::io::Result<()> {
		if let Some(bucket) = self.edits.get_mut(&package.package) {
			bucket.retain(|e| e.attribute() != Attribute::Stability);
		}

		let new = if testing {
			if !package.testing || package.testing_accepted {
				return Ok(());
			}
			vec![PendingEdit {
				target: package.package.clone(),
				value: AttributeValue::Stability(true),
				location: Location::Append { file: ConfigFile::Testing.target_file(&self.config, &package.package) },
				is_removal: false,
			}]
		} else {
			if !package.testing_accepted {
				return Ok(());
			}
			let keyword = format!("~{}", self.config.arch);
			let lines: Vec<PendingEdit> = self.entries(&package.package, ConfigFile::Testing)?
				.into_iter()
				.filter(|e| e.flags.contains(&keyword))
				.map(|e| PendingEdit {
					target: package.package.clone(),
					value: AttributeValue::Stability(false),
					location: Location::Line { file: e.file, line: e.line },
					is_removal: true,
				})
				.collect();
			if lines.is_empty() {
				log::warn!("{} is accepted as testing by something other than a {} entry, leaving it alone", package.package, keyword);
			}
			lines
		};
		self.edits.entry(package.package.clone()).or_default().extend(new);
		Ok(())
	}

	/// Drops every pending edit of `package`.
	pub fn revert(&mut self, package: &PackageRef) {
		if let Some(edits) = self.edits.remove(package) {
			log::debug!("Reverted {} pending edits of {}", edits.len(), package);
		}
	}

	pub fn is_dirty(&self) -> bool {
		!self.edits.is_empty()
	}

	pub fn has_edits(&self, package: &PackageRef) -> bool {
		self.edits.contains_key(package)
	}

	pub fn edits(&self, package: &PackageRef) -> &[PendingEdit] {
		self.edits.get(package).map(Vec::as_slice).unwrap_or_default()
	}

	/// Every pending edit, ordered by package.
	pub fn all_edits(&self) -> Vec<PendingEdit> {
		let mut packages: Vec<&PackageRef> = self.edits.keys().collect();
		packages.sort();
		packages.into_iter().flat_map(|p| self.edits[p].iter().cloned()).collect()
	}

	/// Flag changes pending for `package` as `flag`/`-flag`.
	pub fn use_flag_delta(&self, package: &PackageRef) -> Vec<String> {
		let mut delta: Vec<String> = Vec::new();
		for edit in self.edits(package) {
			let token = match &edit.value {
				AttributeValue::Flag(token) if edit.is_removal => invert_flag(token),
				AttributeValue::Flag(token) => token.clone(),
				_ => continue,
			};
			if !delta.contains(&token) {
				delta.push(token);
			}
		}
		delta
	}

	/// Mask state after commit, `None` when unchanged.
	pub fn new_masking_status(&self, package: &PackageRef) -> Option<bool> {
		self.edits(package).iter().find_map(|e| match e.value {
			AttributeValue::Mask(m) => Some(m),
			_ => None,
		})
	}

	/// Testing acceptance after commit, `None` when unchanged.
	pub fn new_testing_status(&self, package: &PackageRef) -> Option<bool> {
		self.edits(package).iter().find_map(|e| match e.value {
			AttributeValue::Stability(t) => Some(t),
			_ => None,
		})
	}

	/// Writes every pending edit to disk.
	///
	/// Each touched file is read once and staged, files are only replaced once every one of them staged. When
	/// replacing a file fails the files already replaced get their old contents back and the pending edits are
	/// kept so the commit can be retried.
	///
	/// # Errors
	/// - [`Io`](CommitError::Io) when reading or writing a file.
	/// - [`LineOutOfRange`](CommitError::LineOutOfRange) when a file got shorter since the edit was made.
	pub fn commit(&mut self, catalog: &dyn PackageCatalog) -> Result<CommitSummary, CommitError> {
		if self.edits.is_empty() {
			return Ok(CommitSummary::default());
		}

		let mut files = Worktree::new(self.store.as_ref());
		let mut appends: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
		let mut categories = BTreeSet::new();

		let mut packages: Vec<&PackageRef> = self.edits.keys().collect();
		packages.sort();

		for package in packages {
			categories.insert(package.category().to_string());

			let mut edits: Vec<&PendingEdit> = self.edits[package].iter().collect();
			edits.sort_by_key(|e| e.is_removal);

			let mut new_flags: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
			for edit in edits {
				match (&edit.location, &edit.value) {
					(Location::Line { file, line }, value) => {
						let text = files.line_mut(file, *line)?;
						*text = match value {
							AttributeValue::Flag(token) => patch::patch_flag_line(text, token, edit.is_removal),
							_ => patch::comment_out(text),
						};
					},
					(Location::Append { file }, AttributeValue::Flag(token)) => {
						new_flags.entry(file.clone()).or_default().push(token.clone());
					},
					(Location::Append { file }, value) => {
						let spec = edit.config_file().entry_specifier(&self.config, package);
						let entry = match value {
							AttributeValue::Stability(_) => format!("{} ~{}", spec, self.config.arch),
							_ => spec,
						};
						appends.entry(file.clone()).or_default().push(entry);
					},
				}
			}

			let spec = ConfigFile::Use.entry_specifier(&self.config, package);
			for (file, flags) in new_flags {
				appends.entry(file).or_default().push(format!("{} {}", spec, flags.join(" ")));
			}
		}

		for (file, entries) in appends {
			let lines = files.load(&file)?;
			lines.push(String::new());
			lines.push(patch::APPEND_MARKER.to_string());
			lines.extend(entries);
		}

		let written = match files.write() {
			Ok(written) => written,
			Err((error, unrestored)) => {
				/* These files hold their edits now, retrying them would apply them twice */
				for file in &unrestored {
					self.drop_edits_in(file);
				}
				self.entries.clear();
				return Err(error);
			},
		};

		let summary = CommitSummary {
			files: written,
			categories: categories.into_iter().collect(),
		};
		log::info!("Committed pending edits to {} files", summary.files.len());

		self.edits.clear();
		self.entries.clear();
		for category in &summary.categories {
			catalog.reload(Some(category));
		}
		Ok(summary)
	}

	fn drop_edits_in(&mut self, file: &Path) {
		log::error!("Dropping pending edits of {}, the file could not be restored after a failed commit", file.display());
		for bucket in self.edits.values_mut() {
			bucket.retain(|e| e.location.file() != file);
		}
		self.edits.retain(|_, bucket| !bucket.is_empty());
	}
}

/// Files touched by a commit, along with what they held before it.
struct Worktree<'a> {
	store: &'a dyn ConfigStore,
	original: BTreeMap<PathBuf, Vec<String>>,
	current: BTreeMap<PathBuf, Vec<String>>,
}

impl<'a> Worktree<'a> {
	fn new(store: &'a dyn ConfigStore) -> Self {
		Self { store, original: BTreeMap::new(), current: BTreeMap::new() }
	}

	fn load(&mut self, file: &Path) -> Result<&mut Vec<String>, CommitError> {
		use std::collections::btree_map::Entry;
		match self.current.entry(file.to_path_buf()) {
			Entry::Occupied(e) => Ok(e.into_mut()),
			Entry::Vacant(e) => {
				let lines = self.store.read_lines(file).map_err(|source| CommitError::Io { file: file.to_path_buf(), source })?;
				self.original.insert(file.to_path_buf(), lines.clone());
				Ok(e.insert(lines))
			},
		}
	}

	fn line_mut(&mut self, file: &Path, line: usize) -> Result<&mut String, CommitError> {
		self.load(file)?
			.get_mut(line.wrapping_sub(1))
			.ok_or_else(|| CommitError::LineOutOfRange { file: file.to_path_buf(), line })
	}

	/// Stages every file, then replaces them.
	///
	/// Returns the written files. On failure returns the error together with the files that were replaced and
	/// could not be given their old contents back.
	fn write(self) -> Result<Vec<PathBuf>, (CommitError, Vec<PathBuf>)> {
		let mut staged = Vec::new();
		for (file, lines) in &self.current {
			match self.store.stage(file, lines) {
				Ok(s) => staged.push((file, s)),
				Err(source) => return Err((CommitError::Io { file: file.clone(), source }, Vec::new())),
			}
		}

		let mut written: Vec<&PathBuf> = Vec::new();
		for (file, staged) in staged {
			if let Err(source) = staged.persist() {
				log::warn!("Failed to replace {}, restoring {} already written files", file.display(), written.len());
				let unrestored = written.into_iter().filter(|w| !self.restore(w)).cloned().collect();
				return Err((CommitError::Io { file: file.clone(), source }, unrestored));
			}
			written.push(file);
		}
		Ok(written.into_iter().cloned().collect())
	}

	fn restore(&self, file: &Path) -> bool {
		let Some(lines) = self.original.get(file) else { return false };
		match self.store.write_lines(file, lines) {
			Ok(()) => true,
			Err(e) => {
				log::error!("Failed to restore {}: {}", file.display(), e);
				false
			},
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn flag_inversion() {
		assert_eq!(invert_flag("debug"), "-debug");
		assert_eq!(invert_flag("-debug"), "debug");
		assert_eq!(normalize_flag("+debug"), "debug");
	}

	#[test]
	fn edit_config_file() {
		let edit = PendingEdit {
			target: PackageRef::parse("a/b-1").unwrap(),
			value: AttributeValue::Mask(false),
			location: Location::Append { file: PathBuf::from("x") },
			is_removal: false,
		};
		assert_eq!(edit.config_file(), ConfigFile::Unmask);
		assert_eq!(edit.attribute(), Attribute::Mask);
	}
}
