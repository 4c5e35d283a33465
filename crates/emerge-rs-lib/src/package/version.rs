use serde::*;

use super::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Suffix {
	Alpha,
	Beta,
	Pre,
	Rc,
	P,
}

impl Suffix {
	fn from_str(s: &str) -> Option<Self> {
		match s {
			"alpha" => Some(Suffix::Alpha),
			"beta" => Some(Suffix::Beta),
			"pre" => Some(Suffix::Pre),
			"rc" => Some(Suffix::Rc),
			"p" => Some(Suffix::P),
			_ => None,
		}
	}
}

/// Version of a package, `1.2.3b_rc1-r2`.
///
/// Equality is by the written form so `1.0` and `1.00` are different versions even though neither sorts before the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageVersion {
	numbers: Vec<u64>,
	letter: Option<char>,
	suffixes: Vec<(Suffix, u64)>,
	revision: u64,
	text: String,
}

impl PackageVersion {
	pub fn parse(version: &str) -> Result<Self, ParseError> {
		let err = || ParseError::Version(version.to_string());

		let (rest, revision) = match version.rsplit_once("-r") {
			Some((rest, rev)) if !rev.is_empty() && rev.chars().all(|c| c.is_ascii_digit()) => {
				(rest, rev.parse::<u64>().map_err(|_| err())?)
			},
			_ => (version, 0),
		};

		let mut parts = rest.split('_');
		let mut base = parts.next().ok_or_else(err)?;

		let mut letter = None;
		if let Some(c) = base.chars().last() {
			if c.is_ascii_lowercase() {
				letter = Some(c);
				base = &base[..base.len() - 1];
			}
		}

		let numbers = base.split('.')
			.map(|n| if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) { n.parse::<u64>().ok() } else { None })
			.collect::<Option<Vec<_>>>()
			.ok_or_else(err)?;

		let mut suffixes = Vec::new();
		for part in parts {
			let split = part.find(|c: char| c.is_ascii_digit()).unwrap_or(part.len());
			let (name, num) = part.split_at(split);
			let suffix = Suffix::from_str(name).ok_or_else(err)?;
			let num = if num.is_empty() { 0 } else { num.parse::<u64>().map_err(|_| err())? };
			suffixes.push((suffix, num));
		}

		Ok(Self { numbers, letter, suffixes, revision, text: version.to_string() })
	}

	pub fn revision(&self) -> u64 {
		self.revision
	}

	/// Compares everything except the revision, what `~` specifiers match on.
	pub fn cmp_ignoring_revision(&self, other: &Self) -> std::cmp::Ordering {
		use std::cmp::Ordering;

		for (l, r) in self.numbers.iter().zip(other.numbers.iter()) {
			match l.cmp(r) {
				Ordering::Equal => {},
				ord => return ord,
			}
		}
		match self.numbers.len().cmp(&other.numbers.len()) {
			Ordering::Equal => {},
			ord => return ord,
		}

		match self.letter.cmp(&other.letter) {
			Ordering::Equal => {},
			ord => return ord,
		}

		let mut lhs = self.suffixes.iter();
		let mut rhs = other.suffixes.iter();
		loop {
			match (lhs.next(), rhs.next()) {
				(Some(l), Some(r)) => match l.cmp(r) {
					Ordering::Equal => {},
					ord => return ord,
				},
				/* Only `_p` sorts after the bare version */
				(Some((s, _)), None) => return if *s == Suffix::P { Ordering::Greater } else { Ordering::Less },
				(None, Some((s, _))) => return if *s == Suffix::P { Ordering::Less } else { Ordering::Greater },
				(None, None) => return Ordering::Equal,
			}
		}
	}
}

impl std::fmt::Display for PackageVersion {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.text)
	}
}

impl TryFrom<String> for PackageVersion {
	type Error = ParseError;
	fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(&value) }
}

impl From<PackageVersion> for String {
	fn from(value: PackageVersion) -> Self { value.text }
}

impl PartialEq for PackageVersion {
	fn eq(&self, other: &Self) -> bool {
		self.text == other.text
	}
}

impl Eq for PackageVersion {}

impl std::hash::Hash for PackageVersion {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.text.hash(state);
	}
}

impl Ord for PackageVersion {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.cmp_ignoring_revision(other)
			.then(self.revision.cmp(&other.revision))
			.then_with(|| self.text.cmp(&other.text))
	}
}

impl PartialOrd for PackageVersion {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn v(s: &str) -> PackageVersion { PackageVersion::parse(s).unwrap() }

	#[test] fn ord_simple_minor() { assert!(v("1.0") < v("1.1")); }
	#[test] fn ord_numeric_not_lexical() { assert!(v("1.9") < v("1.10")); }
	#[test] fn ord_more_components() { assert!(v("1.0") < v("1.0.1")); }
	#[test] fn ord_letter() { assert!(v("1.0") < v("1.0a")); assert!(v("1.0a") < v("1.0b")); }
	#[test] fn ord_rc_before_release() { assert!(v("1.0_rc1") < v("1.0")); }
	#[test] fn ord_alpha_before_beta() { assert!(v("2.0_alpha3") < v("2.0_beta1")); }
	#[test] fn ord_patch_after_release() { assert!(v("1.0") < v("1.0_p1")); }
	#[test] fn ord_revision() { assert!(v("1.0") < v("1.0-r1")); assert!(v("1.0-r2") < v("1.0-r10")); }
	#[test] fn ord_equal() { assert_eq!(v("3.2.1-r1").cmp(&v("3.2.1-r1")), std::cmp::Ordering::Equal); }
	#[test] fn ignore_revision() { assert_eq!(v("1.0-r3").cmp_ignoring_revision(&v("1.0")), std::cmp::Ordering::Equal); }
	#[test] fn revision_parsed() { assert_eq!(v("4.1_p2-r7").revision(), 7); }
	#[test] fn display_round_trip() { assert_eq!(v("1.2.3b_rc1-r2").to_string(), "1.2.3b_rc1-r2"); }

	#[test]
	fn rejects_garbage() {
		assert!(PackageVersion::parse("").is_err());
		assert!(PackageVersion::parse("abc").is_err());
		assert!(PackageVersion::parse("1.0_gamma").is_err());
		assert!(PackageVersion::parse("1..0").is_err());
	}
}
