//! State mapper
//!
//! Converts typed attributes to JSON request payloads and JSON responses back
//! into typed attributes, following the schema's declared shape and wire
//! names. Explicit presence is preserved: an attribute present in the desired
//! config is always sent, even when it holds the zero value.

use crate::error::{EngineError, Result};
use crate::remote::{RequestPayload, ResponsePayload};
use crate::schema::{AttributeKind, Mutability, ResourceSchema, ScalarKind};
use crate::value::{Attributes, DesiredConfig, Value};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Build a request payload from desired attributes
///
/// Unset attributes are omitted unless the schema declares a default.
/// Computed attributes are never sent.
pub fn to_request(desired: &Attributes, schema: &ResourceSchema) -> RequestPayload {
    let mut payload = RequestPayload::new();
    for (name, attr) in schema.iter() {
        if attr.is_computed() {
            continue;
        }
        let value = desired.get(name).or(attr.default.as_ref());
        if let Some(value) = value {
            payload.insert(
                attr.wire_name_or(name).to_string(),
                value_to_json(&attr.kind, value),
            );
        }
    }
    payload
}

/// Payload for a subset of attributes, used by grouped updates
pub(crate) fn to_request_subset<'a>(
    values: impl IntoIterator<Item = (&'a str, &'a Value)>,
    schema: &ResourceSchema,
) -> RequestPayload {
    values
        .into_iter()
        .filter_map(|(name, value)| {
            schema
                .get(name)
                .map(|attr| (attr.wire_name_or(name).to_string(), value_to_json(&attr.kind, value)))
        })
        .collect()
}

/// Convert one typed value to JSON
pub fn value_to_json(kind: &AttributeKind, value: &Value) -> Json {
    match (kind, value) {
        (AttributeKind::Block(schema), Value::Block(attrs)) => {
            let mut object = serde_json::Map::new();
            for (name, attr) in schema.iter() {
                if attr.is_computed() {
                    continue;
                }
                if let Some(v) = attrs.get(name).or(attr.default.as_ref()) {
                    object.insert(attr.wire_name_or(name).to_string(), value_to_json(&attr.kind, v));
                }
            }
            Json::Object(object)
        }
        (AttributeKind::List(spec), Value::List(items)) => Json::Array(
            items
                .iter()
                .map(|item| value_to_json(&spec.element, item))
                .collect(),
        ),
        (_, value) => plain_json(value),
    }
}

/// JSON for a value without schema-driven wire names
pub(crate) fn plain_json(value: &Value) -> Json {
    match value {
        Value::String(s) => Json::String(s.clone()),
        Value::Int(i) => Json::from(*i),
        Value::Bool(b) => Json::Bool(*b),
        Value::List(items) => Json::Array(items.iter().map(plain_json).collect()),
        Value::Map(entries) | Value::Block(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), plain_json(v)))
                .collect(),
        ),
    }
}

/// Build observed attributes from a response payload
///
/// Missing (or null) fields keep the prior value for computed attributes and
/// become the zero value for user-settable ones. A present field whose shape
/// does not match the schema is a mapping error.
pub fn from_response(
    payload: &ResponsePayload,
    schema: &ResourceSchema,
    prior: Option<&Attributes>,
) -> Result<Attributes> {
    read_block(schema.type_name(), payload, schema, prior)
}

fn read_block(
    path: &str,
    object: &serde_json::Map<String, Json>,
    schema: &ResourceSchema,
    prior: Option<&Attributes>,
) -> Result<Attributes> {
    let mut out = Attributes::new();
    for (name, attr) in schema.iter() {
        let attr_path = format!("{}.{}", path, name);
        let prior_value = prior.and_then(|p| p.get(name));
        match object.get(attr.wire_name_or(name)) {
            None | Some(Json::Null) => match attr.mutability {
                Mutability::Computed | Mutability::OptionalComputed => {
                    if let Some(v) = prior_value {
                        out.insert(name.clone(), v.clone());
                    }
                }
                Mutability::Required | Mutability::Optional => {
                    out.insert(name.clone(), Value::zero_for(&attr.kind));
                }
            },
            Some(json) => {
                let value = json_to_value(&attr_path, &attr.kind, json, prior_value)?;
                out.insert(name.clone(), value);
            }
        }
    }
    Ok(out)
}

fn json_to_value(path: &str, kind: &AttributeKind, json: &Json, prior: Option<&Value>) -> Result<Value> {
    let mismatch = || {
        EngineError::Mapping(format!(
            "{}: expected {}, got {}",
            path,
            kind,
            json_type(json)
        ))
    };

    match kind {
        AttributeKind::Scalar(scalar) => scalar_from_response(*scalar, json).ok_or_else(mismatch),
        AttributeKind::List(spec) => {
            let Json::Array(items) = json else {
                return Err(mismatch());
            };
            items
                .iter()
                .enumerate()
                .map(|(i, item)| json_to_value(&format!("{}[{}]", path, i), &spec.element, item, None))
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
        AttributeKind::Map(scalar) => {
            let Json::Object(entries) = json else {
                return Err(mismatch());
            };
            let mut map = BTreeMap::new();
            for (key, v) in entries {
                let value = scalar_from_response(*scalar, v).ok_or_else(|| {
                    EngineError::Mapping(format!(
                        "{}[{}]: expected {}, got {}",
                        path,
                        key,
                        scalar,
                        json_type(v)
                    ))
                })?;
                map.insert(key.clone(), value);
            }
            Ok(Value::Map(map))
        }
        AttributeKind::Block(schema) => {
            let Json::Object(object) = json else {
                return Err(mismatch());
            };
            let prior_block = prior.and_then(Value::as_block);
            read_block(path, object, schema, prior_block).map(Value::Block)
        }
    }
}

/// Responses may quote numbers
fn scalar_from_response(kind: ScalarKind, json: &Json) -> Option<Value> {
    match (kind, json) {
        (ScalarKind::String, Json::String(s)) => Some(Value::String(s.clone())),
        (ScalarKind::Int, Json::Number(n)) => n.as_i64().map(Value::Int),
        (ScalarKind::Int, Json::String(s)) => s.trim().parse().ok().map(Value::Int),
        (ScalarKind::Bool, Json::Bool(b)) => Some(Value::Bool(*b)),
        _ => None,
    }
}

fn json_type(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Strictly convert user-written JSON (or YAML parsed into JSON) to a
/// desired config
///
/// Keys are attribute names, not wire names. `null` means "not set".
pub fn parse_config(json: &Json, schema: &ResourceSchema) -> Result<DesiredConfig> {
    let config = parse_block(schema.type_name(), json, schema)?;
    schema.validate_config(&config)?;
    Ok(config)
}

fn parse_block(path: &str, json: &Json, schema: &ResourceSchema) -> Result<Attributes> {
    let Json::Object(object) = json else {
        return Err(EngineError::InvalidConfig(format!(
            "{}: expected an object, got {}",
            path,
            json_type(json)
        )));
    };

    let mut out = Attributes::new();
    for (name, value) in object {
        let attr_path = format!("{}.{}", path, name);
        let Some(attr) = schema.get(name) else {
            return Err(EngineError::InvalidConfig(format!(
                "{}: unknown attribute '{}'",
                path, name
            )));
        };
        if value.is_null() {
            continue;
        }
        out.insert(name.clone(), parse_value(&attr_path, &attr.kind, value)?);
    }
    Ok(out)
}

fn parse_value(path: &str, kind: &AttributeKind, json: &Json) -> Result<Value> {
    let mismatch = || {
        EngineError::InvalidConfig(format!(
            "{}: expected {}, got {}",
            path,
            kind,
            json_type(json)
        ))
    };

    match (kind, json) {
        (AttributeKind::Scalar(ScalarKind::String), Json::String(s)) => Ok(Value::String(s.clone())),
        (AttributeKind::Scalar(ScalarKind::Int), Json::Number(n)) => {
            n.as_i64().map(Value::Int).ok_or_else(mismatch)
        }
        (AttributeKind::Scalar(ScalarKind::Bool), Json::Bool(b)) => Ok(Value::Bool(*b)),
        (AttributeKind::List(spec), Json::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_value(&format!("{}[{}]", path, i), &spec.element, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        (AttributeKind::Map(scalar), Json::Object(entries)) => entries
            .iter()
            .map(|(k, v)| {
                parse_value(&format!("{}[{}]", path, k), &AttributeKind::Scalar(*scalar), v)
                    .map(|value| (k.clone(), value))
            })
            .collect::<Result<BTreeMap<_, _>>>()
            .map(Value::Map),
        (AttributeKind::Block(schema), Json::Object(_)) => {
            parse_block(path, json, schema).map(Value::Block)
        }
        _ => Err(mismatch()),
    }
}

/// Render attributes as plain JSON keyed by attribute name, for display
pub fn attributes_to_json(attrs: &Attributes, schema: &ResourceSchema) -> Json {
    Json::Object(
        attrs
            .iter()
            .map(|(name, value)| {
                let json = match schema.get(name) {
                    Some(attr) if attr.sensitive => Json::String("(sensitive)".to_string()),
                    _ => plain_json(value),
                };
                (name.clone(), json)
            })
            .collect(),
    )
}
