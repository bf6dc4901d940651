//! Input and output values of resource nodes.
//!
//! A [`Value`] is either a literal or a deferred [`OutputRef`] pointing at a
//! field another node produces once it has executed. References serialize as
//! `{ "$ref": "<node>.<field>" }` so they can be written directly in the
//! stack file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::GraphError;

/// Key of the single-entry object that marks a reference.
const REF_KEY: &str = "$ref";

/// Input parameters of a node, keyed by parameter name.
pub type Inputs = BTreeMap<String, Value>;

/// Outputs a node produced, keyed by output name.
pub type Outputs = BTreeMap<String, Value>;

/// A literal or deferred value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Explicit absence of a value.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal.
    String(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Deferred reference to another node's output.
    Reference(OutputRef),
    /// String-keyed map of values.
    Map(BTreeMap<String, Value>),
}

/// A reference to an output field of another node.
///
/// The field may be a dotted path; the first segment names the output and
/// the remaining segments descend into map values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RefRepr", into = "RefRepr")]
pub struct OutputRef {
    /// Name of the referenced node.
    pub node: String,
    /// Output field (possibly a dotted path).
    pub field: String,
}

/// Wire form of an [`OutputRef`].
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RefRepr {
    #[serde(rename = "$ref")]
    target: String,
}

impl TryFrom<RefRepr> for OutputRef {
    type Error = String;

    fn try_from(repr: RefRepr) -> Result<Self, Self::Error> {
        Self::parse(&repr.target)
    }
}

impl From<OutputRef> for RefRepr {
    fn from(reference: OutputRef) -> Self {
        Self {
            target: reference.to_string(),
        }
    }
}

impl OutputRef {
    /// Creates a new reference.
    #[must_use]
    pub fn new(node: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            field: field.into(),
        }
    }

    /// Parses a reference from `node.field` notation.
    ///
    /// # Errors
    ///
    /// Returns an error if either part is missing.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.split_once('.') {
            Some((node, field)) if !node.is_empty() && !field.is_empty() => {
                Ok(Self::new(node, field))
            }
            _ => Err(format!(
                "Invalid reference: {s}. Expected format: NODE.FIELD"
            )),
        }
    }

    /// Returns the path segments of the field.
    pub fn path(&self) -> impl Iterator<Item = &str> {
        self.field.split('.')
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.field)
    }
}

impl Value {
    /// Creates a deferred reference value.
    #[must_use]
    pub fn reference(node: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Reference(OutputRef::new(node, field))
    }

    /// Creates a map value from key/value pairs.
    #[must_use]
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Self>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the string content, if this is a string literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the entry for `key`, if this is a map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Returns true if the value contains no deferred references.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Reference(_) => false,
            Self::List(items) => items.iter().all(Self::is_resolved),
            Self::Map(map) => map.values().all(Self::is_resolved),
            _ => true,
        }
    }

    /// Rejects `$ref` objects that did not parse as a reference.
    ///
    /// Such objects deserialize as plain maps, so without this check they
    /// would reach the provider as literals and create no dependency.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed reference.
    pub fn check_references(&self) -> Result<(), String> {
        match self {
            Self::Map(map) => {
                if map.len() == 1
                    && let Some(target) = map.get(REF_KEY)
                {
                    return Err(match target {
                        Self::String(s) => OutputRef::parse(s)
                            .err()
                            .unwrap_or_else(|| format!("Invalid reference: {s}")),
                        other => format!(
                            "Invalid reference: {other:?}. Expected format: NODE.FIELD"
                        ),
                    });
                }
                map.values().try_for_each(Self::check_references)
            }
            Self::List(items) => items.iter().try_for_each(Self::check_references),
            _ => Ok(()),
        }
    }

    /// Collects every deferred reference contained in the value.
    #[must_use]
    pub fn references(&self) -> Vec<&OutputRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a OutputRef>) {
        match self {
            Self::Reference(r) => refs.push(r),
            Self::List(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Self::Map(map) => {
                for value in map.values() {
                    value.collect_references(refs);
                }
            }
            _ => {}
        }
    }

    /// Replaces every reference using `lookup`, producing a literal value.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `lookup`.
    pub fn resolve<F>(&self, lookup: &F) -> Result<Self, GraphError>
    where
        F: Fn(&OutputRef) -> Result<Self, GraphError>,
    {
        match self {
            Self::Reference(r) => lookup(r),
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            Self::Map(map) => map
                .iter()
                .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self::Map),
            literal => Ok(literal.clone()),
        }
    }

    /// Replaces `token` with `replacement` in every string and reference.
    #[must_use]
    pub fn substitute(&self, token: &str, replacement: &str) -> Self {
        match self {
            Self::String(s) => Self::String(s.replace(token, replacement)),
            Self::Reference(r) => Self::Reference(OutputRef::new(
                r.node.replace(token, replacement),
                r.field.replace(token, replacement),
            )),
            Self::List(items) => Self::List(
                items
                    .iter()
                    .map(|item| item.substitute(token, replacement))
                    .collect(),
            ),
            Self::Map(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.substitute(token, replacement)))
                    .collect(),
            ),
            literal => literal.clone(),
        }
    }

    /// Descends into nested maps following `path`.
    #[must_use]
    pub fn lookup_path<'a, I>(&self, path: I) -> Option<&Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        path.into_iter()
            .try_fold(self, |current, segment| current.get(segment))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Self>> for Value {
    fn from(map: BTreeMap<String, Self>) -> Self {
        Self::Map(map)
    }
}

impl From<OutputRef> for Value {
    fn from(reference: OutputRef) -> Self {
        Self::Reference(reference)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Reference(r) => write!(f, "${{{r}}}"),
            Self::List(_) | Self::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                write!(f, "{json}")
            }
        }
    }
}
