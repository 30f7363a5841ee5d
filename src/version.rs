// src/version.rs

//! Version ordering for recipe references
//!
//! Versions are tokenized on `.` and `-`. Numeric tokens compare as integers,
//! other tokens compare as text and always sort below numbers (so `1.4.rc2`
//! sorts below `1.4.0`). Trailing zero tokens are ignored, which makes `4`,
//! `4.0` and `4.0.0` equal. When one version runs out of tokens first, the
//! first extra token of the longer one decides: a number makes the longer
//! version greater (`4.0.a > 4`), text makes it smaller (`4.a < 4`).
//! Anything after `+` is build metadata and is only consulted when the
//! main tokens are equal.
//!
//! Versions are used for sorting and display only. Cache identity always uses
//! the literal version string.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VersionItem {
    Number(u64),
    Text(String),
}

impl VersionItem {
    fn parse(token: &str) -> Self {
        match token.parse::<u64>() {
            Ok(number) => VersionItem::Number(number),
            Err(_) => VersionItem::Text(token.to_string()),
        }
    }

    fn is_zero(&self) -> bool {
        matches!(self, VersionItem::Number(0))
    }
}

impl Ord for VersionItem {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VersionItem::Number(a), VersionItem::Number(b)) => a.cmp(b),
            (VersionItem::Text(a), VersionItem::Text(b)) => a.cmp(b),
            (VersionItem::Text(_), VersionItem::Number(_)) => Ordering::Less,
            (VersionItem::Number(_), VersionItem::Text(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for VersionItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A package version string with loose, token-based ordering
#[derive(Debug, Clone)]
pub struct Version {
    value: String,
    items: Vec<VersionItem>,
    build: String,
}

impl Version {
    /// Parse a version string. Parsing never fails; every token is either a
    /// number or text.
    pub fn new(value: &str) -> Self {
        let value = value.trim();
        let (base, build) = match value.split_once('+') {
            Some((base, build)) => (base, build),
            None => (value, ""),
        };

        let items = base.split(['.', '-']).map(VersionItem::parse).collect();

        Self {
            value: value.to_string(),
            items,
            build: build.to_string(),
        }
    }

    /// The literal version string
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Build metadata after `+`, empty if none
    pub fn build(&self) -> &str {
        &self.build
    }

    /// Major component, if the first token is numeric
    pub fn major(&self) -> Option<u64> {
        match self.items.first() {
            Some(VersionItem::Number(n)) => Some(*n),
            _ => None,
        }
    }

    fn significant_items(&self) -> &[VersionItem] {
        let end = self
            .items
            .iter()
            .rposition(|item| !item.is_zero())
            .map_or(0, |pos| pos + 1);
        &self.items[..end]
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let (mine, theirs) = (self.significant_items(), other.significant_items());
        for (a, b) in mine.iter().zip(theirs) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }

        let by_tokens = match (mine.get(theirs.len()), theirs.get(mine.len())) {
            (Some(extra), _) => extra_token_order(extra),
            (_, Some(extra)) => extra_token_order(extra).reverse(),
            _ => Ordering::Equal,
        };

        // Equal main tokens: a "greater" build string sorts first
        by_tokens.then_with(|| other.build.cmp(&self.build))
    }
}

/// How the longer of two versions compares, given its first extra token
fn extra_token_order(extra: &VersionItem) -> Ordering {
    match extra {
        VersionItem::Number(_) => Ordering::Greater,
        VersionItem::Text(_) => Ordering::Less,
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant_items().hash(state);
        self.build.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Version::new(value)
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Version::new(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::new(s)
    }

    #[test]
    fn test_numeric_tokens_compare_as_integers() {
        assert!(v("1.2.11") > v("1.2.9"));
        assert!(v("1.10") > v("1.9"));
        assert!(v("2") > v("1.99.99"));
    }

    #[test]
    fn test_missing_tokens_count_as_zero() {
        assert_eq!(v("4"), v("4.0"));
        assert_eq!(v("4.0"), v("4.0.0"));
        assert!(v("4") < v("4.0.1"));
        assert!(v("4.0.1") > v("4"));
        assert!(v("4.0.a") > v("4"));
        assert!(v("4") < v("4.0.a"));
        assert!(v("4.a") < v("4"));
        assert!(v("4") > v("4.a"));
    }

    #[test]
    fn test_dash_is_a_separator() {
        assert_eq!(v("1.4-2"), v("1.4.2"));
        assert!(v("1.4-rc2") < v("1.4.0"));
    }

    #[test]
    fn test_text_tokens_sort_below_numbers() {
        assert!(v("1.4.rc2") < v("1.4"));
        assert!(v("1.4") > v("1.4.rc2"));
        assert!(v("1.4.rc1") < v("1.4.rc2"));
        assert!(v("1.a") < v("1.0"));
    }

    #[test]
    fn test_build_metadata_breaks_ties_inverted() {
        assert!(v("1.0+b2") < v("1.0+b1"));
        assert!(v("1.0") > v("1.0+b1"));
        assert_eq!(v("1.0+b1"), v("1.0.0+b1"));
    }

    #[test]
    fn test_sort_is_stable_and_total() {
        let mut versions = vec![v("1.10"), v("1.4.rc2"), v("1.4"), v("1.9"), v("1.2.11")];
        versions.sort();
        let sorted: Vec<&str> = versions.iter().map(|v| v.as_str()).collect();
        assert_eq!(sorted, vec!["1.2.11", "1.4.rc2", "1.4", "1.9", "1.10"]);
    }

    #[test]
    fn test_display_keeps_literal_string() {
        assert_eq!(v(" 1.2.0 ").to_string(), "1.2.0");
        assert_eq!(v("1.2.0+abc").build(), "abc");
        assert_eq!(v("3.1").major(), Some(3));
        assert_eq!(v("develop").major(), None);
    }

    #[test]
    fn test_equal_versions_hash_equal() {
        use std::collections::HashSet;
        let set: HashSet<Version> = [v("4"), v("4.0"), v("4.0.0")].into_iter().collect();
        assert_eq!(set.len(), 1);
    }
}
