//! Version ordering of database identifiers
//!
//! Managed database names embed a dotted version (`sde_1.4.2`). Identifiers
//! are only ever ordered through [`compare`]; [`DatabaseIdentifier`] has no
//! `Ord` impl so a lexical sort cannot slip in (`sde_10.0.0` must sort after
//! `sde_9.0.0`).

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

/// First version-like run in an identifier: up to three dot-separated
/// components, the last of which may be a `*` wildcard.
static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+\.)?(\d+\.)?(\*|\d+)").expect("Invalid regex pattern for embedded version")
});

/// Name of a live database in the data store
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseIdentifier(String);

impl DatabaseIdentifier {
    /// Wrap a database name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The raw database name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Version embedded in the name, `0.0.0` when there is none
    pub fn version(&self) -> Version {
        embedded_version(&self.0)
    }
}

impl fmt::Display for DatabaseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DatabaseIdentifier {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for DatabaseIdentifier {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Extract the semantic version embedded in an identifier.
///
/// Missing minor/patch components are treated as 0 (`db_12` is `12.0.0`).
/// Components are read as plain integers, so zero-padded date versions such
/// as `sde_2023.01.15` order numerically. Identifiers without a version, with
/// a wildcard component or with components that overflow fall back to
/// `0.0.0`, the lowest version, so malformed names sort first and are retired
/// first.
pub fn embedded_version(identifier: &str) -> Version {
    VERSION_PATTERN
        .find(identifier)
        .and_then(|found| parse_components(found.as_str()))
        .unwrap_or_else(|| Version::new(0, 0, 0))
}

fn parse_components(matched: &str) -> Option<Version> {
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(matched.split('.')) {
        *slot = part.parse().ok()?;
    }
    let [major, minor, patch] = numbers;
    Some(Version::new(major, minor, patch))
}

/// Order two identifiers by their embedded versions.
pub fn compare(a: &DatabaseIdentifier, b: &DatabaseIdentifier) -> Ordering {
    embedded_version(a.as_str()).cmp(&embedded_version(b.as_str()))
}

/// Sort identifiers ascending by embedded version.
///
/// The sort is stable: identifiers with equal versions (including every
/// unparseable name) keep their input order, so the same snapshot always
/// produces the same ranking.
pub fn sort_by_version(identifiers: &mut [DatabaseIdentifier]) {
    identifiers.sort_by_cached_key(DatabaseIdentifier::version);
}
