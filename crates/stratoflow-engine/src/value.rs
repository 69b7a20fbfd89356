//! Attribute values
//!
//! Desired and observed state are both trees of [`Value`]s keyed by attribute
//! name. Presence of a key in an [`Attributes`] map is the explicit-presence
//! bit: an attribute set to `0` or `false` is different from one never set.

use crate::schema::{AttributeKind, ScalarKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute name -> value
pub type Attributes = BTreeMap<String, Value>;

/// Attributes the user declared for one resource
pub type DesiredConfig = Attributes;

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Block(Attributes),
}

impl Value {
    /// The zero value for an attribute kind
    pub fn zero_for(kind: &AttributeKind) -> Self {
        match kind {
            AttributeKind::Scalar(scalar) => Self::zero_scalar(*scalar),
            AttributeKind::List(_) => Value::List(Vec::new()),
            AttributeKind::Map(_) => Value::Map(BTreeMap::new()),
            AttributeKind::Block(schema) => Value::Block(
                schema
                    .iter()
                    .map(|(name, attr)| (name.clone(), Value::zero_for(&attr.kind)))
                    .collect(),
            ),
        }
    }

    pub fn zero_scalar(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::String => Value::String(String::new()),
            ScalarKind::Int => Value::Int(0),
            ScalarKind::Bool => Value::Bool(false),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Value::String(s) => s.is_empty(),
            Value::Int(i) => *i == 0,
            Value::Bool(b) => !b,
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            Value::Block(attrs) => attrs.values().all(Value::is_zero),
        }
    }

    /// Short name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Block(_) => "block",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&Attributes> {
        match self {
            Value::Block(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::String(_) => 2,
            Value::List(_) => 3,
            Value::Map(_) => 4,
            Value::Block(_) => 5,
        }
    }

    /// Total order over values, used to compare unordered collections
    pub fn canonical_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => cmp_seq(a.iter(), b.iter()),
            (Value::Map(a), Value::Map(b)) | (Value::Block(a), Value::Block(b)) => {
                cmp_entries(a, b)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

fn cmp_seq<'a>(
    mut a: impl Iterator<Item = &'a Value>,
    mut b: impl Iterator<Item = &'a Value>,
) -> Ordering {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.canonical_cmp(y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

fn cmp_entries(a: &BTreeMap<String, Value>, b: &BTreeMap<String, Value>) -> Ordering {
    let mut a = a.iter();
    let mut b = b.iter();
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((ka, va)), Some((kb, vb))) => match ka.cmp(kb).then_with(|| va.canonical_cmp(vb)) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) | Value::Block(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Build an [`Attributes`] map from `(name, value)` pairs
///
/// ```ignore
/// let attrs = attributes([("name", Value::from("x")), ("size", Value::from(10))]);
/// ```
pub fn attributes<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Attributes
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
