//! Access to the on-disk configuration files.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::package::PackageRef;

/// A line of a configuration file that mentions a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
	pub file: PathBuf,
	/// 1-based.
	pub line: usize,
	/// The specifier at the start of the line.
	pub criterion: String,
	/// Everything after the specifier up to a comment.
	pub flags: Vec<String>,
}

pub trait ConfigStore: Send + Sync {
	/// Lines in `path` that could refer to `package`, `path` may be a file or a directory of files.
	///
	/// Only the name is searched for, callers still have to check the criterion matches the version.
	fn find_entries(&self, package: &PackageRef, path: &Path) -> std::io::Result<Vec<ConfigEntry>>;

	/// A missing file reads as empty.
	fn read_lines(&self, file: &Path) -> std::io::Result<Vec<String>>;

	/// Prepares `lines` as the new contents of `file`, the file itself is untouched until the result is persisted.
	fn stage(&self, file: &Path, lines: &[String]) -> std::io::Result<Box<dyn StagedFile>>;

	fn write_lines(&self, file: &Path, lines: &[String]) -> std::io::Result<()> {
		self.stage(file, lines)?.persist()
	}
}

/// New contents of a file waiting to replace it, dropping it discards the contents.
pub trait StagedFile: Send {
	fn persist(self: Box<Self>) -> std::io::Result<()>;
}

/// Parses a configuration line into specifier and flags, `None` for blank and comment lines.
pub fn parse_line(line: &str) -> Option<(String, Vec<String>)> {
	let mut tokens = line.split_whitespace();
	let criterion = tokens.next()?;
	if criterion.starts_with('#') {
		return None;
	}
	let flags = tokens.take_while(|t| !t.starts_with('#')).map(str::to_string).collect();
	Some((criterion.to_string(), flags))
}

/// [`ConfigStore`] on the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct FsConfigStore;

impl FsConfigStore {
	pub fn new() -> Self {
		Self
	}

	fn files_in(path: &Path) -> Vec<PathBuf> {
		if path.is_file() {
			return vec![path.to_path_buf()];
		}
		let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
			.follow_links(true)
			.into_iter()
			.filter_map(|e| match e {
				Ok(e) => Some(e),
				Err(e) => { log::warn!("Skipping unreadable config path: {}", e); None },
			})
			.filter(|e| e.file_type().is_file())
			/* Editor backups and hidden files are ignored by the package manager too */
			.filter(|e| {
				let name = e.file_name().to_string_lossy();
				!name.starts_with('.') && !name.ends_with('~')
			})
			.map(|e| e.into_path())
			.collect();
		files.sort();
		files
	}
}

impl ConfigStore for FsConfigStore {
	fn find_entries(&self, package: &PackageRef, path: &Path) -> std::io::Result<Vec<ConfigEntry>> {
		if !path.exists() {
			return Ok(Vec::new());
		}

		let pattern = regex::Regex::new(&format!(
			r"^[<>!=~]{{0,2}}{}(?:-[0-9]\S*)?(?::\S*)?(?:\s.*)?$",
			regex::escape(&package.cp())
		)).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

		let mut entries = Vec::new();
		for file in Self::files_in(path) {
			for (i, line) in self.read_lines(&file)?.iter().enumerate() {
				let trimmed = line.trim();
				if !pattern.is_match(trimmed) {
					continue;
				}
				if let Some((criterion, flags)) = parse_line(trimmed) {
					entries.push(ConfigEntry { file: file.clone(), line: i + 1, criterion, flags });
				}
			}
		}
		log::trace!("Found {} config entries for {} in {}", entries.len(), package, path.display());
		Ok(entries)
	}

	fn read_lines(&self, file: &Path) -> std::io::Result<Vec<String>> {
		match std::fs::read_to_string(file) {
			Ok(s) => Ok(s.lines().map(str::to_string).collect()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(e) => Err(e),
		}
	}

	/// Writes a temporary file in the same directory, persisting renames it over `file`.
	fn stage(&self, file: &Path, lines: &[String]) -> std::io::Result<Box<dyn StagedFile>> {
		let dir = file.parent().unwrap_or_else(|| Path::new("."));
		std::fs::create_dir_all(dir)?;

		let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
		for line in lines {
			writeln!(tmp, "{}", line)?;
		}
		tmp.flush()?;
		Ok(Box::new(FsStagedFile { tmp, file: file.to_path_buf(), lines: lines.len() }))
	}
}

struct FsStagedFile {
	tmp: tempfile::NamedTempFile,
	file: PathBuf,
	lines: usize,
}

impl StagedFile for FsStagedFile {
	fn persist(self: Box<Self>) -> std::io::Result<()> {
		let FsStagedFile { tmp, file, lines } = *self;
		tmp.persist(&file).map_err(|e| e.error)?;
		log::debug!("Wrote {} lines to {}", lines, file.display());
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parse_config_line() {
		assert_eq!(parse_line("app-misc/foo -debug ssl # note"), Some(("app-misc/foo".to_string(), vec!["-debug".to_string(), "ssl".to_string()])));
		assert_eq!(parse_line("   "), None);
		assert_eq!(parse_line("#app-misc/foo debug"), None);
	}

	#[test]
	fn find_in_file_and_directory() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsConfigStore::new();
		let package = PackageRef::parse("app-misc/foo-1.0").unwrap();

		let file = dir.path().join("package.use");
		std::fs::write(&file, "app-misc/foobar x\n=app-misc/foo-1.0 debug\n# app-misc/foo y\napp-misc/foo:0 -ssl\n").unwrap();
		let entries = store.find_entries(&package, &file).unwrap();
		assert_eq!(entries.iter().map(|e| e.line).collect::<Vec<_>>(), vec![2, 4]);
		assert_eq!(entries[0].criterion, "=app-misc/foo-1.0");
		assert_eq!(entries[1].flags, vec!["-ssl".to_string()]);

		let nested = dir.path().join("package.mask");
		std::fs::create_dir_all(nested.join("sub")).unwrap();
		std::fs::write(nested.join("sub").join("a"), ">=app-misc/foo-2\n").unwrap();
		std::fs::write(nested.join("b~"), "app-misc/foo\n").unwrap();
		let entries = store.find_entries(&package, &nested).unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].criterion, ">=app-misc/foo-2");

		assert!(store.find_entries(&package, &dir.path().join("missing")).unwrap().is_empty());
	}

	#[test]
	fn write_creates_parents() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsConfigStore::new();
		let file = dir.path().join("package.use").join("emerge-rs");
		store.write_lines(&file, &["a/b x".to_string()]).unwrap();
		assert_eq!(store.read_lines(&file).unwrap(), vec!["a/b x".to_string()]);
		assert!(store.read_lines(&dir.path().join("nothing")).unwrap().is_empty());
	}

	#[test]
	fn staged_until_persisted() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsConfigStore::new();
		let file = dir.path().join("package.mask");
		std::fs::write(&file, "a/b\n").unwrap();

		drop(store.stage(&file, &["c/d".to_string()]).unwrap());
		assert_eq!(std::fs::read_to_string(&file).unwrap(), "a/b\n");
		assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

		let staged = store.stage(&file, &["c/d".to_string()]).unwrap();
		assert_eq!(std::fs::read_to_string(&file).unwrap(), "a/b\n");
		staged.persist().unwrap();
		assert_eq!(std::fs::read_to_string(&file).unwrap(), "c/d\n");
	}
}
