use std::path::PathBuf;

use crate::Config;
use crate::package::PackageRef;

/// The configuration files the overlay edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFile {
	Use,
	Mask,
	Unmask,
	Testing,
}

impl ConfigFile {
	/// The configured path, may be a file or a directory.
	pub fn path(&self, config: &Config) -> PathBuf {
		match self {
			ConfigFile::Use => config.use_path(),
			ConfigFile::Mask => config.mask_path(),
			ConfigFile::Unmask => config.unmask_path(),
			ConfigFile::Testing => config.testing_path(),
		}
	}

	fn name_pattern<'a>(&self, config: &'a Config) -> &'a str {
		match self {
			ConfigFile::Use => &config.use_file,
			ConfigFile::Mask | ConfigFile::Unmask => &config.mask_file,
			ConfigFile::Testing => &config.testing_file,
		}
	}

	fn per_version(&self, config: &Config) -> bool {
		match self {
			ConfigFile::Use => config.use_per_version,
			ConfigFile::Mask | ConfigFile::Unmask => config.mask_per_version,
			ConfigFile::Testing => config.testing_per_version,
		}
	}

	/// File new entries for `package` are appended to.
	pub fn target_file(&self, config: &Config, package: &PackageRef) -> PathBuf {
		let path = self.path(config);
		if path.is_dir() {
			path.join(generate_path(package, self.name_pattern(config)))
		} else {
			path
		}
	}

	/// How `package` is written on a newly appended line.
	pub fn entry_specifier(&self, config: &Config, package: &PackageRef) -> String {
		if self.per_version(config) {
			format!("={}", package)
		} else {
			package.cp()
		}
	}
}

/// Expands the file name placeholders.
///
/// - `$(cat)` category, `$(cat-1)`/`$(cat-2)` the parts of a hyphenated category
/// - `$(pkg)` package name
/// - `$(version)` version including revision
pub fn generate_path(package: &PackageRef, pattern: &str) -> String {
	let mut cat_parts = package.category().splitn(2, '-');
	let cat1 = cat_parts.next().unwrap_or_default();
	let cat2 = cat_parts.next().unwrap_or_default();

	pattern
		.replace("$(cat)", package.category())
		.replace("$(cat-1)", cat1)
		.replace("$(cat-2)", cat2)
		.replace("$(pkg)", package.name())
		.replace("$(version)", &package.version().to_string())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn placeholders() {
		let p = PackageRef::parse("app-misc/foo-1.0-r1").unwrap();
		assert_eq!(generate_path(&p, "$(cat)"), "app-misc");
		assert_eq!(generate_path(&p, "$(cat-1)_$(cat-2)"), "app_misc");
		assert_eq!(generate_path(&p, "$(pkg)-$(version)"), "foo-1.0-r1");
		assert_eq!(generate_path(&p, "static"), "static");

		let p = PackageRef::parse("virtual/bar-2").unwrap();
		assert_eq!(generate_path(&p, "$(cat-1)+$(cat-2)"), "virtual+");
	}

	#[test]
	fn target_file_in_directory() {
		let dir = tempfile::tempdir().unwrap();
		let config = Config { config_root: dir.path().to_path_buf(), use_file: "$(cat)".to_string(), ..Default::default() };
		let p = PackageRef::parse("app-misc/foo-1.0").unwrap();

		assert_eq!(ConfigFile::Use.target_file(&config, &p), dir.path().join("package.use"));
		std::fs::create_dir(dir.path().join("package.use")).unwrap();
		assert_eq!(ConfigFile::Use.target_file(&config, &p), dir.path().join("package.use").join("app-misc"));
	}

	#[test]
	fn entry_specifier() {
		let config = Config { mask_per_version: false, ..Default::default() };
		let p = PackageRef::parse("app-misc/foo-1.0").unwrap();
		assert_eq!(ConfigFile::Use.entry_specifier(&config, &p), "=app-misc/foo-1.0");
		assert_eq!(ConfigFile::Unmask.entry_specifier(&config, &p), "app-misc/foo");
	}
}
