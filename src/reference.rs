// src/reference.rs

//! Recipe and package references
//!
//! A recipe reference reads `name/version[@user[/channel]][#revision][%timestamp]`,
//! a package reference appends `:package_id[#revision][%timestamp]` to a recipe
//! reference. Each reference has three serializations:
//!
//! - `Display` (`to_string()`): no revision, no timestamp. User facing, and the
//!   value stored in the `reference` column of the index.
//! - `repr_notime()`: revision but no timestamp. Input to folder hashing.
//! - `repr()`: revision and timestamp. Used for logging and persistence.
//!
//! The timestamp never takes part in equality or hashing.

use crate::error::{Error, Result};
use crate::version::Version;
use chrono::Utc;
use regex::Regex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Seconds since the Unix epoch, with sub-second precision
pub fn timestamp_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Format a timestamp so that parsing it back yields the same text.
/// Whole numbers keep one decimal (`1700000000.0`).
pub fn format_timestamp(timestamp: f64) -> String {
    if timestamp.is_finite() && timestamp.fract() == 0.0 {
        format!("{:.1}", timestamp)
    } else {
        format!("{}", timestamp)
    }
}

fn parse_timestamp(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|ts| ts.is_finite())
}

/// Split a trailing `%timestamp`, if any
fn split_timestamp(text: &str) -> Option<(&str, Option<f64>)> {
    match text.rsplit_once('%') {
        Some((head, ts)) => Some((head, Some(parse_timestamp(ts)?))),
        None => Some((text, None)),
    }
}

/// Split a trailing `#revision`, if any
fn split_revision(text: &str) -> Option<(&str, Option<String>)> {
    match text.split_once('#') {
        Some((_, rev)) if rev.is_empty() || rev.contains('#') => None,
        Some((head, rev)) => Some((head, Some(rev.to_string()))),
        None => Some((text, None)),
    }
}

fn valid_token(token: &str) -> bool {
    !token.is_empty() && !token.contains(['/', '@', '#', '%', ':'])
}

/// Identity of a recipe, optionally pinned to one revision
#[derive(Debug, Clone)]
pub struct RecipeReference {
    pub name: String,
    pub version: Version,
    pub user: Option<String>,
    pub channel: Option<String>,
    pub revision: Option<String>,
    pub timestamp: Option<f64>,
}

impl RecipeReference {
    /// Create a reference without user, channel or revision
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: Version::new(version),
            user: None,
            channel: None,
            revision: None,
            timestamp: None,
        }
    }

    /// Builder: set user and channel
    pub fn with_user_channel(mut self, user: &str, channel: Option<&str>) -> Self {
        self.user = Some(user.to_string());
        self.channel = channel.map(str::to_string);
        self
    }

    /// Builder: set the revision
    pub fn with_revision(mut self, revision: &str) -> Self {
        self.revision = Some(revision.to_string());
        self
    }

    /// Builder: set the timestamp
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Parse `name/version[@user[/channel]][#revision][%timestamp]`
    pub fn loads(text: &str) -> Result<Self> {
        Self::parse(text).ok_or_else(|| {
            Error::InvalidReference(format!(
                "{} is not a valid recipe reference, provide a reference \
                 in the form name/version[@user/channel]",
                text
            ))
        })
    }

    fn parse(text: &str) -> Option<Self> {
        let (text, timestamp) = split_timestamp(text)?;
        let (text, revision) = split_revision(text)?;

        let (ident, user_channel) = match text.split_once('@') {
            Some((ident, uc)) => (ident, Some(uc)),
            None => (text, None),
        };

        let (name, version) = ident.split_once('/')?;
        if !valid_token(name) || !valid_token(version) {
            return None;
        }

        let (user, channel) = match user_channel {
            None => (None, None),
            Some(uc) => match uc.split_once('/') {
                Some((user, channel)) => {
                    if !valid_token(user) || !valid_token(channel) {
                        return None;
                    }
                    (Some(user.to_string()), Some(channel.to_string()))
                }
                None => {
                    if !valid_token(uc) {
                        return None;
                    }
                    (Some(uc.to_string()), None)
                }
            },
        };

        Some(Self {
            name: name.to_string(),
            version: Version::new(version),
            user,
            channel,
            revision,
            timestamp,
        })
    }

    /// Same identity without revision and timestamp
    pub fn without_revision(&self) -> Self {
        Self {
            revision: None,
            timestamp: None,
            ..self.clone()
        }
    }

    /// `name/version@user/channel#revision`
    pub fn repr_notime(&self) -> String {
        match &self.revision {
            Some(rev) => format!("{}#{}", self, rev),
            None => self.to_string(),
        }
    }

    /// `name/version@user/channel#revision%timestamp`
    pub fn repr(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("{}%{}", self.repr_notime(), format_timestamp(ts)),
            None => self.repr_notime(),
        }
    }

    /// Ordering key for listings: name, then version, then user/channel
    pub fn sort_key(&self) -> (&str, &Version, &str, &str) {
        (
            &self.name,
            &self.version,
            self.user.as_deref().unwrap_or(""),
            self.channel.as_deref().unwrap_or(""),
        )
    }
}

impl fmt::Display for RecipeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        if let Some(user) = &self.user {
            write!(f, "@{}", user)?;
            if let Some(channel) = &self.channel {
                write!(f, "/{}", channel)?;
            }
        }
        Ok(())
    }
}

impl PartialEq for RecipeReference {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version.as_str() == other.version.as_str()
            && self.user == other.user
            && self.channel == other.channel
            && self.revision == other.revision
    }
}

impl Eq for RecipeReference {}

impl Hash for RecipeReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.as_str().hash(state);
        self.user.hash(state);
        self.channel.hash(state);
        self.revision.hash(state);
    }
}

impl FromStr for RecipeReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::loads(s)
    }
}

/// Identity of one binary package of a recipe revision
#[derive(Debug, Clone)]
pub struct PkgReference {
    pub recipe: RecipeReference,
    pub package_id: String,
    pub revision: Option<String>,
    pub timestamp: Option<f64>,
}

impl PkgReference {
    pub fn new(recipe: RecipeReference, package_id: &str) -> Self {
        Self {
            recipe,
            package_id: package_id.to_string(),
            revision: None,
            timestamp: None,
        }
    }

    /// Builder: set the package revision
    pub fn with_revision(mut self, revision: &str) -> Self {
        self.revision = Some(revision.to_string());
        self
    }

    /// Builder: set the timestamp
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Parse `recipe:package_id[#revision][%timestamp]`
    pub fn loads(text: &str) -> Result<Self> {
        Self::parse(text).ok_or_else(|| {
            Error::InvalidReference(format!(
                "{} is not a valid package reference, provide a reference \
                 in the form name/version[@user/channel]:package_id",
                text
            ))
        })
    }

    fn parse(text: &str) -> Option<Self> {
        let (recipe_text, package_text) = text.split_once(':')?;
        let recipe = RecipeReference::parse(recipe_text)?;

        let (package_text, timestamp) = split_timestamp(package_text)?;
        let (package_id, revision) = split_revision(package_text)?;
        if !valid_token(package_id) {
            return None;
        }

        Some(Self {
            recipe,
            package_id: package_id.to_string(),
            revision,
            timestamp,
        })
    }

    /// `recipe#rrev:package_id#prev`
    pub fn repr_notime(&self) -> String {
        let mut result = format!("{}:{}", self.recipe.repr_notime(), self.package_id);
        if let Some(rev) = &self.revision {
            result.push('#');
            result.push_str(rev);
        }
        result
    }

    /// `recipe#rrev%ts:package_id#prev%ts`
    pub fn repr(&self) -> String {
        let mut result = format!("{}:{}", self.recipe.repr(), self.package_id);
        if let Some(rev) = &self.revision {
            result.push('#');
            result.push_str(rev);
        }
        if let Some(ts) = self.timestamp {
            result.push('%');
            result.push_str(&format_timestamp(ts));
        }
        result
    }
}

impl fmt::Display for PkgReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.recipe, self.package_id)
    }
}

impl PartialEq for PkgReference {
    fn eq(&self, other: &Self) -> bool {
        self.recipe == other.recipe
            && self.package_id == other.package_id
            && self.revision == other.revision
    }
}

impl Eq for PkgReference {}

impl Hash for PkgReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.recipe.hash(state);
        self.package_id.hash(state);
        self.revision.hash(state);
    }
}

impl FromStr for PkgReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::loads(s)
    }
}

/// Case-insensitive glob (`*`, `?`) over recipe references. Patterns
/// select references, not revisions, so `#` is rejected.
#[derive(Debug, Clone)]
pub struct RefPattern {
    regex: Regex,
}

impl RefPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.contains('#') {
            return Err(Error::InvalidReference(format!(
                "Pattern '{}' cannot select revisions",
                pattern
            )));
        }

        let mut expr = String::from("(?i)^");
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| Error::InvalidReference(format!("Invalid pattern '{}': {}", pattern, e)))?;
        Ok(Self { regex })
    }

    /// Match against `name/version[@user[/channel]]`, ignoring any revision
    pub fn matches(&self, reference: &RecipeReference) -> bool {
        self.regex.is_match(&reference.to_string())
    }
}
