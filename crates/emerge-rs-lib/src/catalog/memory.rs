//! A catalog kept entirely in memory, optionally backed by a JSON file.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use crate::package::*;
use super::*;

#[derive(Debug, Default)]
pub struct MemoryCatalog {
	source: Option<PathBuf>,
	packages: RwLock<Vec<PackageRecord>>,
	reloads: Mutex<Vec<Option<String>>>,
}

impl MemoryCatalog {
	pub fn new(packages: impl IntoIterator<Item = PackageRecord>) -> Self {
		Self {
			source: None,
			packages: RwLock::new(packages.into_iter().collect()),
			reloads: Mutex::new(Vec::new()),
		}
	}

	/// Reads a JSON array of [`PackageRecord`]s, the file is read again on every [`reload()`](PackageCatalog::reload).
	///
	/// # Errors
	/// - [`IO`](crate::error::Error::IO) when opening or reading from the file.
	/// - [`SerdeJSON`](crate::error::Error::SerdeJSON) when deserializing the file.
	pub fn load_from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
		let path = path.as_ref();
		let packages = Self::read_file(path)?;
		log::debug!("Loaded {} packages from {}", packages.len(), path.display());
		Ok(Self {
			source: Some(path.to_path_buf()),
			packages: RwLock::new(packages),
			reloads: Mutex::new(Vec::new()),
		})
	}

	fn read_file(path: &Path) -> crate::Result<Vec<PackageRecord>> {
		let file = std::fs::File::open(path)?;
		Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
	}

	/// Adds `record`, replacing any record of the same package.
	pub fn insert(&self, record: PackageRecord) {
		let mut packages = self.packages.write().unwrap_or_else(PoisonError::into_inner);
		packages.retain(|r| r.package != record.package);
		packages.push(record);
	}

	/// Changes the record of `package` in place, returns `false` if there is none.
	pub fn update(&self, package: &PackageRef, f: impl FnOnce(&mut PackageRecord)) -> bool {
		let mut packages = self.packages.write().unwrap_or_else(PoisonError::into_inner);
		match packages.iter_mut().find(|r| &r.package == package) {
			Some(r) => { f(r); true },
			None => false,
		}
	}

	/// Categories passed to [`reload()`](PackageCatalog::reload) so far, `None` for full reloads.
	pub fn reloads(&self) -> Vec<Option<String>> {
		self.reloads.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	fn matching(&self, specifier: &Specifier, include_masked: bool) -> Vec<PackageRecord> {
		self.packages.read().unwrap_or_else(PoisonError::into_inner)
			.iter()
			.filter(|r| specifier.matches_slotted(&r.package, &r.slot))
			.filter(|r| include_masked || r.is_visible())
			.cloned()
			.collect()
	}
}

impl PackageCatalog for MemoryCatalog {
	fn resolve(&self, specifier: &Specifier, include_masked: bool) -> Option<PackageRecord> {
		self.matching(specifier, include_masked)
			.into_iter()
			.max_by(|a, b| a.package.version().cmp(b.package.version()))
	}

	fn find(&self, specifier: &Specifier, include_masked: bool) -> Vec<PackageRef> {
		let mut found: Vec<_> = self.matching(specifier, include_masked).into_iter().map(|r| r.package).collect();
		found.sort();
		found
	}

	fn installed_in_slot(&self, package: &PackageRecord) -> Option<PackageRecord> {
		let key = package.slot_key();
		self.packages.read().unwrap_or_else(PoisonError::into_inner)
			.iter()
			.find(|r| r.installed && r.slot_key() == key)
			.cloned()
	}

	fn installed_matching(&self, specifier: &Specifier) -> Vec<PackageRecord> {
		self.matching(specifier, true).into_iter().filter(|r| r.installed).collect()
	}

	fn is_installed(&self, package: &PackageRef) -> bool {
		self.packages.read().unwrap_or_else(PoisonError::into_inner)
			.iter()
			.any(|r| &r.package == package && r.installed)
	}

	fn reload(&self, category: Option<&str>) {
		log::debug!("Reloading catalog {}", category.unwrap_or("(all categories)"));
		self.reloads.lock().unwrap_or_else(PoisonError::into_inner).push(category.map(str::to_string));

		let Some(source) = &self.source else { return };
		match Self::read_file(source) {
			Ok(packages) => *self.packages.write().unwrap_or_else(PoisonError::into_inner) = packages,
			Err(e) => log::warn!("Failed to reload catalog from {}: {}", source.display(), e),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn record(s: &str) -> PackageRecord {
		PackageRecord::new(PackageRef::parse(s).unwrap())
	}

	#[test]
	fn resolve_prefers_highest_visible() {
		let mut masked = record("app-misc/foo-3.0");
		masked.masked = true;
		let catalog = MemoryCatalog::new(vec![record("app-misc/foo-1.0"), record("app-misc/foo-2.0"), masked]);
		let spec = Specifier::parse("app-misc/foo").unwrap();

		assert_eq!(catalog.resolve(&spec, false).unwrap().package.to_string(), "app-misc/foo-2.0");
		assert_eq!(catalog.resolve(&spec, true).unwrap().package.to_string(), "app-misc/foo-3.0");
		assert_eq!(catalog.find(&spec, false).len(), 2);
	}

	#[test]
	fn installed_in_slot() {
		let mut old = record("app-misc/foo-1.0");
		old.installed = true;
		let mut other_slot = record("app-misc/foo-0.9");
		other_slot.installed = true;
		other_slot.slot = "legacy".to_string();
		let catalog = MemoryCatalog::new(vec![old, other_slot, record("app-misc/foo-2.0")]);

		let new = catalog.record(&PackageRef::parse("app-misc/foo-2.0").unwrap()).unwrap();
		assert_eq!(catalog.installed_in_slot(&new).unwrap().package.to_string(), "app-misc/foo-1.0");
		assert_eq!(catalog.installed_matching(&Specifier::parse("app-misc/foo").unwrap()).len(), 2);
	}

	#[test]
	fn reload_reads_source_again() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("catalog.json");
		std::fs::write(&path, r#"[{"package": "app-misc/foo-1.0"}]"#).unwrap();
		let catalog = MemoryCatalog::load_from_file(&path).unwrap();
		assert!(!catalog.is_installed(&PackageRef::parse("app-misc/foo-1.0").unwrap()));

		std::fs::write(&path, r#"[{"package": "app-misc/foo-1.0", "installed": true}]"#).unwrap();
		catalog.reload(Some("app-misc"));
		assert!(catalog.is_installed(&PackageRef::parse("app-misc/foo-1.0").unwrap()));
		assert_eq!(catalog.reloads(), vec![Some("app-misc".to_string())]);
	}
}
