//! Schema descriptors
//!
//! A [`ResourceSchema`] declares, per resource type, which attributes exist,
//! their kinds and how they may change. Schemas are built once at start-up
//! from static declarations and never mutated afterwards.
//!
//! ```ignore
//! let schema = ResourceSchema::builder("clickhouse_instance")
//!     .attribute("name", Attribute::required(AttributeKind::string()))
//!     .attribute("zone", Attribute::required(AttributeKind::string()).force_new())
//!     .attribute("status", Attribute::computed(AttributeKind::string()))
//!     .build()?;
//! ```

use crate::error::{EngineError, Result};
use crate::value::{Attributes, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Update group for attributes that do not name one
pub const DEFAULT_UPDATE_GROUP: &str = "core";

/// Scalar attribute types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    String,
    Int,
    Bool,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::String => write!(f, "string"),
            ScalarKind::Int => write!(f, "int"),
            ScalarKind::Bool => write!(f, "bool"),
        }
    }
}

/// Whether element order of a list carries meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionOrder {
    Significant,
    Unordered,
}

/// List attribute description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSpec {
    pub element: Box<AttributeKind>,
    pub order: CollectionOrder,
    /// For lists of blocks: the element attribute that identifies an element
    pub identity_key: Option<String>,
}

/// Shape of an attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    Scalar(ScalarKind),
    List(ListSpec),
    Map(ScalarKind),
    Block(ResourceSchema),
}

impl AttributeKind {
    pub fn string() -> Self {
        AttributeKind::Scalar(ScalarKind::String)
    }

    pub fn int() -> Self {
        AttributeKind::Scalar(ScalarKind::Int)
    }

    pub fn bool() -> Self {
        AttributeKind::Scalar(ScalarKind::Bool)
    }

    /// Order-significant list
    pub fn list_of(element: AttributeKind) -> Self {
        AttributeKind::List(ListSpec {
            element: Box::new(element),
            order: CollectionOrder::Significant,
            identity_key: None,
        })
    }

    /// Unordered list (set semantics)
    pub fn set_of(element: AttributeKind) -> Self {
        AttributeKind::List(ListSpec {
            element: Box::new(element),
            order: CollectionOrder::Unordered,
            identity_key: None,
        })
    }

    /// List of blocks whose elements are matched by `identity_key`
    pub fn keyed_blocks(schema: ResourceSchema, identity_key: impl Into<String>) -> Self {
        AttributeKind::List(ListSpec {
            element: Box::new(AttributeKind::Block(schema)),
            order: CollectionOrder::Unordered,
            identity_key: Some(identity_key.into()),
        })
    }

    pub fn map_of(value: ScalarKind) -> Self {
        AttributeKind::Map(value)
    }

    pub fn block(schema: ResourceSchema) -> Self {
        AttributeKind::Block(schema)
    }

    /// Whether `value` has this shape (recursively)
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (AttributeKind::Scalar(ScalarKind::String), Value::String(_))
            | (AttributeKind::Scalar(ScalarKind::Int), Value::Int(_))
            | (AttributeKind::Scalar(ScalarKind::Bool), Value::Bool(_)) => true,
            (AttributeKind::List(spec), Value::List(items)) => {
                items.iter().all(|item| spec.element.accepts(item))
            }
            (AttributeKind::Map(scalar), Value::Map(entries)) => entries
                .values()
                .all(|v| AttributeKind::Scalar(*scalar).accepts(v)),
            (AttributeKind::Block(schema), Value::Block(attrs)) => {
                attrs.iter().all(|(name, v)| {
                    schema
                        .get(name)
                        .map(|attr| attr.kind.accepts(v))
                        .unwrap_or(false)
                })
            }
            _ => false,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeKind::Scalar(s) => write!(f, "{}", s),
            AttributeKind::List(spec) => match spec.order {
                CollectionOrder::Significant => write!(f, "list({})", spec.element),
                CollectionOrder::Unordered => write!(f, "set({})", spec.element),
            },
            AttributeKind::Map(s) => write!(f, "map({})", s),
            AttributeKind::Block(schema) => write!(f, "block({})", schema.type_name()),
        }
    }
}

/// Who may set an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    /// Must be set by the user
    Required,
    /// May be set by the user
    Optional,
    /// May be set by the user; when unset the remote side decides
    OptionalComputed,
    /// Only ever filled from the remote side
    Computed,
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::Required => write!(f, "required"),
            Mutability::Optional => write!(f, "optional"),
            Mutability::OptionalComputed => write!(f, "optional+computed"),
            Mutability::Computed => write!(f, "computed"),
        }
    }
}

/// One attribute declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub kind: AttributeKind,
    pub mutability: Mutability,
    /// A change can only be applied by delete + create
    pub force_replace: bool,
    pub default: Option<Value>,
    /// Field name in request/response payloads, if different
    pub wire_name: Option<String>,
    /// Independently updatable sub-resource this attribute belongs to
    pub update_group: Option<String>,
    /// Masked in plan output
    pub sensitive: bool,
}

impl Attribute {
    fn new(kind: AttributeKind, mutability: Mutability) -> Self {
        Self {
            kind,
            mutability,
            force_replace: false,
            default: None,
            wire_name: None,
            update_group: None,
            sensitive: false,
        }
    }

    pub fn required(kind: AttributeKind) -> Self {
        Self::new(kind, Mutability::Required)
    }

    pub fn optional(kind: AttributeKind) -> Self {
        Self::new(kind, Mutability::Optional)
    }

    pub fn optional_computed(kind: AttributeKind) -> Self {
        Self::new(kind, Mutability::OptionalComputed)
    }

    pub fn computed(kind: AttributeKind) -> Self {
        Self::new(kind, Mutability::Computed)
    }

    pub fn force_new(mut self) -> Self {
        self.force_replace = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn wire(mut self, name: impl Into<String>) -> Self {
        self.wire_name = Some(name.into());
        self
    }

    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.update_group = Some(name.into());
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn is_computed(&self) -> bool {
        self.mutability == Mutability::Computed
    }

    /// Whether the user may set this attribute
    pub fn is_settable(&self) -> bool {
        self.mutability != Mutability::Computed
    }

    /// Whether the remote may fill this attribute when the user leaves it unset
    pub fn remote_fills(&self) -> bool {
        matches!(
            self.mutability,
            Mutability::Computed | Mutability::OptionalComputed
        )
    }

    pub fn group_name(&self) -> &str {
        self.update_group.as_deref().unwrap_or(DEFAULT_UPDATE_GROUP)
    }

    pub fn wire_name_or<'a>(&'a self, name: &'a str) -> &'a str {
        self.wire_name.as_deref().unwrap_or(name)
    }
}

/// Attribute declarations for one resource type (or one nested block)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSchema {
    type_name: String,
    attributes: Vec<(String, Attribute)>,
}

impl ResourceSchema {
    pub fn builder(type_name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            type_name: type_name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
    }

    /// Attributes in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Attribute)> {
        self.attributes.iter().map(|(n, a)| (n, a))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Update groups in declaration order, without duplicates
    pub fn update_groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for (_, attr) in self.iter() {
            if attr.is_settable() && !groups.contains(&attr.group_name()) {
                groups.push(attr.group_name());
            }
        }
        groups
    }

    /// Check that a user configuration conforms to this schema
    pub fn validate_config(&self, config: &Attributes) -> Result<()> {
        self.validate_block(self.type_name(), config)
    }

    fn validate_block(&self, path: &str, config: &Attributes) -> Result<()> {
        for name in config.keys() {
            if self.get(name).is_none() {
                return Err(EngineError::InvalidConfig(format!(
                    "{}: unknown attribute '{}'",
                    path, name
                )));
            }
        }

        for (name, attr) in self.iter() {
            let attr_path = format!("{}.{}", path, name);
            match config.get(name) {
                None if attr.mutability == Mutability::Required => {
                    return Err(EngineError::InvalidConfig(format!(
                        "{}: required attribute is missing",
                        attr_path
                    )));
                }
                None => {}
                Some(_) if attr.is_computed() => {
                    return Err(EngineError::InvalidConfig(format!(
                        "{}: computed attribute cannot be set",
                        attr_path
                    )));
                }
                Some(value) => validate_value(&attr_path, &attr.kind, value)?,
            }
        }
        Ok(())
    }
}

fn validate_value(path: &str, kind: &AttributeKind, value: &Value) -> Result<()> {
    match (kind, value) {
        (AttributeKind::Block(schema), Value::Block(attrs)) => schema.validate_block(path, attrs),
        (AttributeKind::List(spec), Value::List(items)) => {
            let mut seen = HashSet::new();
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}[{}]", path, i);
                validate_value(&item_path, &spec.element, item)?;
                if let (Some(key), Value::Block(attrs)) = (&spec.identity_key, item) {
                    let identity = attrs.get(key).map(|v| v.to_string()).unwrap_or_default();
                    if !seen.insert(identity.clone()) {
                        return Err(EngineError::InvalidConfig(format!(
                            "{}: duplicate {} {}",
                            item_path, key, identity
                        )));
                    }
                }
            }
            Ok(())
        }
        _ if kind.accepts(value) => Ok(()),
        _ => Err(EngineError::InvalidConfig(format!(
            "{}: expected {}, got {}",
            path,
            kind,
            value.type_name()
        ))),
    }
}

/// Builder for [`ResourceSchema`]
#[derive(Debug)]
pub struct SchemaBuilder {
    type_name: String,
    attributes: Vec<(String, Attribute)>,
}

impl SchemaBuilder {
    pub fn attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.push((name.into(), attribute));
        self
    }

    pub fn build(self) -> Result<ResourceSchema> {
        let mut names = HashSet::new();
        let mut wire_names = HashSet::new();

        for (name, attr) in &self.attributes {
            let path = format!("{}.{}", self.type_name, name);

            if !names.insert(name.as_str()) {
                return Err(EngineError::Schema(format!("{}: duplicate attribute", path)));
            }
            if !wire_names.insert(attr.wire_name_or(name)) {
                return Err(EngineError::Schema(format!(
                    "{}: duplicate wire name '{}'",
                    path,
                    attr.wire_name_or(name)
                )));
            }

            if let Some(default) = &attr.default {
                if !matches!(attr.mutability, Mutability::Optional | Mutability::OptionalComputed)
                {
                    return Err(EngineError::Schema(format!(
                        "{}: only optional attributes may declare a default",
                        path
                    )));
                }
                if !attr.kind.accepts(default) {
                    return Err(EngineError::Schema(format!(
                        "{}: default {} does not match {}",
                        path, default, attr.kind
                    )));
                }
            }

            if attr.is_computed() && attr.force_replace {
                return Err(EngineError::Schema(format!(
                    "{}: computed attributes cannot force replacement",
                    path
                )));
            }

            if let AttributeKind::List(spec) = &attr.kind {
                if let Some(key) = &spec.identity_key {
                    let AttributeKind::Block(element) = spec.element.as_ref() else {
                        return Err(EngineError::Schema(format!(
                            "{}: identity key '{}' requires block elements",
                            path, key
                        )));
                    };
                    match element.get(key) {
                        Some(k)
                            if k.mutability == Mutability::Required
                                && matches!(k.kind, AttributeKind::Scalar(_)) => {}
                        _ => {
                            return Err(EngineError::Schema(format!(
                                "{}: identity key '{}' must be a required scalar of {}",
                                path,
                                key,
                                element.type_name()
                            )));
                        }
                    }
                }
            }
        }

        Ok(ResourceSchema {
            type_name: self.type_name,
            attributes: self.attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::attributes;

    fn rule_schema() -> ResourceSchema {
        ResourceSchema::builder("rule")
            .attribute("name", Attribute::required(AttributeKind::string()))
            .attribute("port", Attribute::optional(AttributeKind::int()))
            .build()
            .unwrap()
    }

    fn instance_schema() -> ResourceSchema {
        ResourceSchema::builder("instance")
            .attribute("name", Attribute::required(AttributeKind::string()))
            .attribute("size", Attribute::optional(AttributeKind::int()).with_default(10))
            .attribute("zone", Attribute::required(AttributeKind::string()).force_new())
            .attribute(
                "rules",
                Attribute::optional(AttributeKind::keyed_blocks(rule_schema(), "name")),
            )
            .attribute("status", Attribute::computed(AttributeKind::string()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let result = ResourceSchema::builder("x")
            .attribute("a", Attribute::required(AttributeKind::string()))
            .attribute("a", Attribute::optional(AttributeKind::int()))
            .build();
        assert!(matches!(result, Err(EngineError::Schema(_))));
    }

    #[test]
    fn test_duplicate_wire_name_rejected() {
        let result = ResourceSchema::builder("x")
            .attribute("a", Attribute::required(AttributeKind::string()).wire("A"))
            .attribute("b", Attribute::optional(AttributeKind::int()).wire("A"))
            .build();
        assert!(matches!(result, Err(EngineError::Schema(_))));
    }

    #[test]
    fn test_default_must_match_kind() {
        let result = ResourceSchema::builder("x")
            .attribute("a", Attribute::optional(AttributeKind::int()).with_default("ten"))
            .build();
        assert!(matches!(result, Err(EngineError::Schema(_))));
    }

    #[test]
    fn test_identity_key_must_exist() {
        let result = ResourceSchema::builder("x")
            .attribute(
                "rules",
                Attribute::optional(AttributeKind::keyed_blocks(rule_schema(), "id")),
            )
            .build();
        assert!(matches!(result, Err(EngineError::Schema(_))));
    }

    #[test]
    fn test_validate_config() {
        let schema = instance_schema();

        let ok = attributes([("name", Value::from("x")), ("zone", Value::from("a"))]);
        assert!(schema.validate_config(&ok).is_ok());

        let missing = attributes([("name", "x")]);
        assert!(schema.validate_config(&missing).is_err());

        let computed = attributes([
            ("name", Value::from("x")),
            ("zone", Value::from("a")),
            ("status", Value::from("serving")),
        ]);
        assert!(schema.validate_config(&computed).is_err());

        let wrong_kind = attributes([
            ("name", Value::from("x")),
            ("zone", Value::from("a")),
            ("size", Value::from("big")),
        ]);
        let err = schema.validate_config(&wrong_kind).unwrap_err();
        assert!(err.to_string().contains("instance.size: expected int"));

        let unknown = attributes([
            ("name", Value::from("x")),
            ("zone", Value::from("a")),
            ("colour", Value::from("red")),
        ]);
        assert!(schema.validate_config(&unknown).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_identity() {
        let schema = instance_schema();
        let rule = Value::Block(attributes([("name", "http")]));
        let config = attributes([
            ("name", Value::from("x")),
            ("zone", Value::from("a")),
            ("rules", Value::List(vec![rule.clone(), rule])),
        ]);
        let err = schema.validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate name"));
    }

    #[test]
    fn test_update_groups_in_declaration_order() {
        let schema = ResourceSchema::builder("x")
            .attribute("name", Attribute::required(AttributeKind::string()))
            .attribute(
                "tags",
                Attribute::optional(AttributeKind::map_of(ScalarKind::String)).group("tags"),
            )
            .attribute("size", Attribute::optional(AttributeKind::int()))
            .attribute("id", Attribute::computed(AttributeKind::string()).group("ignored"))
            .build()
            .unwrap();
        assert_eq!(schema.update_groups(), vec!["core", "tags"]);
    }
}
