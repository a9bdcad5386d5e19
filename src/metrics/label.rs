//! Sorted label sets.
//!
//! Label sets are kept sorted by name so that lookups are a binary search
//! and the identity of a metric serializes deterministically. Most families
//! carry one to three labels, so a sorted vector beats any hashed structure.

use crate::core::{KestrelError, Result};
use std::cmp::Ordering;
use std::fmt;

/// A single label, i.e. a name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelPair {
    /// Label name, matching `[A-Za-z_][A-Za-z0-9_]*`
    pub name: String,
    /// Label value, never empty inside a [`LabelSet`]
    pub value: String,
}

/// Set of labels sorted by name. Names are unique by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSet {
    pairs: Vec<LabelPair>,
}

/// Returns true if `c` may appear in a label name.
pub(crate) fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Checks `name` against `[A-Za-z_][A-Za-z0-9_]*`. Reserved names are
/// rejected as well.
pub fn validate_label_name(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        return Err(KestrelError::invalid("label name is empty"));
    };
    if first.is_ascii_digit() || !name.chars().all(is_label_char) {
        return Err(KestrelError::invalid(format!("invalid label name {name:?}")));
    }
    if is_reserved_label_name(name) {
        return Err(KestrelError::invalid(format!("label name {name:?} is reserved")));
    }
    Ok(())
}

/// Checks a resource attribute name. Attributes follow OpenTelemetry
/// naming, so dots are allowed after the first character (`host.name`).
pub fn validate_attribute_name(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        return Err(KestrelError::invalid("attribute name is empty"));
    };
    let valid = name.chars().all(|c| is_label_char(c) || c == '.');
    if first.is_ascii_digit() || first == '.' || !valid {
        return Err(KestrelError::invalid(format!("invalid attribute name {name:?}")));
    }
    Ok(())
}

/// Returns true for names beginning with `__`, which are reserved for internal use.
pub fn is_reserved_label_name(name: &str) -> bool {
    name.starts_with("__")
}

impl LabelSet {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a label set from name/value pairs, failing on the first invalid or duplicate name.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.add(name, value)?;
        }
        Ok(set)
    }

    /// Builds a resource attribute set from name/value pairs.
    pub fn from_attributes<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.add_attribute(name, value)?;
        }
        Ok(set)
    }

    fn position(&self, name: &str) -> std::result::Result<usize, usize> {
        self.pairs.binary_search_by(|pair| pair.name.as_str().cmp(name))
    }

    /// Returns the value of label `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).ok().map(|idx| self.pairs[idx].value.as_str())
    }

    /// Adds a new label.
    ///
    /// Fails with `Invalid` for malformed names and `Exists` if `name` is
    /// already present. An empty `value` is accepted and ignored.
    pub fn add(&mut self, name: &str, value: &str) -> Result<()> {
        validate_label_name(name)?;
        self.insert(name, value)
    }

    /// Like [`LabelSet::add`] but validates `name` as a resource attribute.
    pub fn add_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        validate_attribute_name(name)?;
        self.insert(name, value)
    }

    fn insert(&mut self, name: &str, value: &str) -> Result<()> {
        let idx = match self.position(name) {
            Ok(_) => return Err(KestrelError::exists(format!("label {name:?} already set"))),
            Err(idx) => idx,
        };
        if value.is_empty() {
            return Ok(());
        }
        self.pairs.insert(
            idx,
            LabelPair {
                name: name.to_string(),
                value: value.to_string(),
            },
        );
        Ok(())
    }

    /// Inserts or updates label `name`. An empty `value` removes the label;
    /// removing a label that does not exist is not an error.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        validate_label_name(name)?;
        self.upsert(name, value)
    }

    /// Like [`LabelSet::set`] but validates `name` as a resource attribute.
    pub fn set_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        validate_attribute_name(name)?;
        self.upsert(name, value)
    }

    fn upsert(&mut self, name: &str, value: &str) -> Result<()> {
        match self.position(name) {
            Ok(idx) if value.is_empty() => {
                self.pairs.remove(idx);
                Ok(())
            },
            Ok(idx) => {
                self.pairs[idx].value = value.to_string();
                Ok(())
            },
            Err(_) if value.is_empty() => Ok(()),
            Err(_) => self.insert(name, value),
        }
    }

    /// Removes label `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).ok().map(|idx| self.pairs.remove(idx).value)
    }

    /// Number of labels in the set.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if the set holds no labels.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates the labels in name order.
    pub fn iter(&self) -> impl Iterator<Item = &LabelPair> {
        self.pairs.iter()
    }

    /// Drops every label.
    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

impl Ord for LabelSet {
    // Pairwise name/value comparison; a strict prefix sorts first.
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.pairs.iter().zip(&other.pairs) {
            let cmp = a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value));
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        self.pairs.len().cmp(&other.pairs.len())
    }
}

impl PartialOrd for LabelSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a LabelPair;
    type IntoIter = std::slice::Iter<'a, LabelPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, pair) in self.pairs.iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            write!(f, "{}=\"", pair.name)?;
            crate::metrics::identity::write_escaped(f, &pair.value)?;
            f.write_str("\"")?;
        }
        f.write_str("}")
    }
}
