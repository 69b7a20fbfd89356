//! Diff engine
//!
//! [`diff`] compares a desired configuration against last-known state,
//! walking only the positions the schema declares. It is a pure function:
//! same inputs, same [`ChangeSet`].

use crate::schema::{Attribute, AttributeKind, CollectionOrder, Mutability, ResourceSchema};
use crate::value::{Attributes, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One step into an attribute tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    Attr(String),
    Index(usize),
    /// Element of a keyed block list, addressed by its identity
    Identity { key: String, value: String },
}

/// Location of an attribute, rendered as `rules[name=http].port`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributePath(Vec<PathSegment>);

impl AttributePath {
    pub fn root(name: impl Into<String>) -> Self {
        Self(vec![PathSegment::Attr(name.into())])
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Top-level attribute name
    pub fn head(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathSegment::Attr(name)) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Attr(name) if i == 0 => write!(f, "{}", name)?,
                PathSegment::Attr(name) => write!(f, ".{}", name)?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
                PathSegment::Identity { key, value } => write!(f, "[{}={}]", key, value)?,
            }
        }
        Ok(())
    }
}

/// A single attribute difference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub path: AttributePath,
    /// Observed value (`None` = absent)
    pub old: Option<Value>,
    /// Desired value (`None` = unset by the user)
    pub new: Option<Value>,
    pub requires_replace: bool,
    pub update_group: String,
}

/// Ordered set of differences between desired and observed state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<AttributeChange>,
    /// Any change needs delete + create of the whole resource
    pub requires_replace: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Update groups touched by this change set, in schema order
    pub fn update_groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for change in &self.changes {
            if !groups.contains(&change.update_group.as_str()) {
                groups.push(&change.update_group);
            }
        }
        groups
    }

    /// Paths of the changes that force replacement
    pub fn replace_reasons(&self) -> Vec<String> {
        self.changes
            .iter()
            .filter(|c| c.requires_replace)
            .map(|c| c.path.to_string())
            .collect()
    }

    fn push(&mut self, change: AttributeChange) {
        self.requires_replace |= change.requires_replace;
        self.changes.push(change);
    }
}

struct Walk<'a> {
    group: &'a str,
    force: bool,
}

/// Compare `desired` against `observed` under `schema`
pub fn diff(desired: &Attributes, observed: &Attributes, schema: &ResourceSchema) -> ChangeSet {
    let mut out = ChangeSet::default();
    for (name, attr) in schema.iter() {
        let walk = Walk {
            group: attr.group_name(),
            force: attr.force_replace,
        };
        diff_attribute(
            &walk,
            AttributePath::root(name),
            attr,
            desired.get(name),
            observed.get(name),
            &mut out,
        );
    }
    out
}

fn diff_attribute(
    walk: &Walk<'_>,
    path: AttributePath,
    attr: &Attribute,
    desired: Option<&Value>,
    observed: Option<&Value>,
    out: &mut ChangeSet,
) {
    let desired = match desired {
        Some(value) => value.clone(),
        None => match attr.mutability {
            // Filled from the remote side, never a change source
            Mutability::Computed | Mutability::OptionalComputed => return,
            Mutability::Optional | Mutability::Required => match &attr.default {
                Some(default) => default.clone(),
                None => {
                    // Unset: only a change when the remote holds something
                    if observed.is_some_and(|v| !v.is_zero()) {
                        out.push(AttributeChange {
                            path,
                            old: observed.cloned(),
                            new: None,
                            requires_replace: walk.force,
                            update_group: walk.group.to_string(),
                        });
                    }
                    return;
                }
            },
        },
    };

    compare(walk, path, &attr.kind, &desired, observed, out);
}

fn compare(
    walk: &Walk<'_>,
    path: AttributePath,
    kind: &AttributeKind,
    desired: &Value,
    observed: Option<&Value>,
    out: &mut ChangeSet,
) {
    match (kind, desired, observed) {
        (AttributeKind::Block(schema), Value::Block(d), Some(Value::Block(o))) => {
            for (name, child) in schema.iter() {
                let child_walk = Walk {
                    group: walk.group,
                    force: walk.force || child.force_replace,
                };
                diff_attribute(
                    &child_walk,
                    path.child(PathSegment::Attr(name.clone())),
                    child,
                    d.get(name),
                    o.get(name),
                    out,
                );
            }
        }
        (AttributeKind::List(spec), Value::List(d), Some(Value::List(o))) => {
            match (&spec.identity_key, spec.element.as_ref()) {
                (Some(key), AttributeKind::Block(element)) => {
                    compare_keyed(walk, &path, key, element, spec.order, d, o, out)
                }
                (None, AttributeKind::Block(element))
                    if spec.order == CollectionOrder::Significant && d.len() == o.len() =>
                {
                    for (i, (dv, ov)) in d.iter().zip(o.iter()).enumerate() {
                        compare(
                            walk,
                            path.child(PathSegment::Index(i)),
                            &AttributeKind::Block(element.clone()),
                            dv,
                            Some(ov),
                            out,
                        );
                    }
                }
                (None, AttributeKind::Block(element))
                    if spec.order == CollectionOrder::Unordered =>
                {
                    if !same_blocks(element, d, o) {
                        push_value_change(walk, path, observed, desired, out);
                    }
                }
                _ => {
                    let equal = match spec.order {
                        CollectionOrder::Significant => d == o,
                        CollectionOrder::Unordered => same_elements(d, o),
                    };
                    if !equal {
                        push_value_change(walk, path, observed, desired, out);
                    }
                }
            }
        }
        _ => {
            if observed != Some(desired) {
                push_value_change(walk, path, observed, desired, out);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compare_keyed(
    walk: &Walk<'_>,
    path: &AttributePath,
    key: &str,
    element: &ResourceSchema,
    order: CollectionOrder,
    desired: &[Value],
    observed: &[Value],
    out: &mut ChangeSet,
) {
    let identity = |v: &Value| -> String {
        v.as_block()
            .and_then(|attrs| attrs.get(key))
            .map(identity_text)
            .unwrap_or_default()
    };

    let observed_by_id: BTreeMap<String, &Value> =
        observed.iter().map(|v| (identity(v), v)).collect();
    let desired_ids: Vec<String> = desired.iter().map(identity).collect();

    for (item, id) in desired.iter().zip(desired_ids.iter()) {
        let item_path = path.child(PathSegment::Identity {
            key: key.to_string(),
            value: id.clone(),
        });
        match observed_by_id.get(id) {
            Some(existing) => compare(
                walk,
                item_path,
                &AttributeKind::Block(element.clone()),
                item,
                Some(existing),
                out,
            ),
            None => push_value_change(walk, item_path, None, item, out),
        }
    }

    for item in observed {
        let id = identity(item);
        if !desired_ids.contains(&id) {
            out.push(AttributeChange {
                path: path.child(PathSegment::Identity {
                    key: key.to_string(),
                    value: id,
                }),
                old: Some(item.clone()),
                new: None,
                requires_replace: walk.force,
                update_group: walk.group.to_string(),
            });
        }
    }

    if order == CollectionOrder::Significant {
        let observed_ids: Vec<String> = observed.iter().map(identity).collect();
        let common_desired: Vec<&String> = desired_ids
            .iter()
            .filter(|id| observed_ids.contains(id))
            .collect();
        let common_observed: Vec<&String> = observed_ids
            .iter()
            .filter(|id| desired_ids.contains(id))
            .collect();
        if common_desired != common_observed {
            push_value_change(
                walk,
                path.clone(),
                Some(&Value::List(observed.to_vec())),
                &Value::List(desired.to_vec()),
                out,
            );
        }
    }
}

fn identity_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn same_elements(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<&Value> = a.iter().collect();
    let mut b: Vec<&Value> = b.iter().collect();
    a.sort_by(|x, y| x.canonical_cmp(y));
    b.sort_by(|x, y| x.canonical_cmp(y));
    a == b
}

/// Unkeyed block sets: every desired element pairs with one observed
/// element that it does not differ from under the element schema
fn same_blocks(element: &ResourceSchema, desired: &[Value], observed: &[Value]) -> bool {
    if desired.len() != observed.len() {
        return false;
    }
    let kind = AttributeKind::Block(element.clone());
    let walk = Walk {
        group: "",
        force: false,
    };
    let mut unmatched: Vec<&Value> = observed.iter().collect();
    for item in desired {
        let hit = unmatched.iter().position(|candidate| {
            let mut scratch = ChangeSet::default();
            compare(
                &walk,
                AttributePath::default(),
                &kind,
                item,
                Some(candidate),
                &mut scratch,
            );
            scratch.is_empty()
        });
        match hit {
            Some(i) => {
                unmatched.swap_remove(i);
            }
            None => return false,
        }
    }
    true
}

fn push_value_change(
    walk: &Walk<'_>,
    path: AttributePath,
    old: Option<&Value>,
    new: &Value,
    out: &mut ChangeSet,
) {
    out.push(AttributeChange {
        path,
        old: old.cloned(),
        new: Some(new.clone()),
        requires_replace: walk.force,
        update_group: walk.group.to_string(),
    });
}

/// A force-replace attribute that changed on the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drift {
    pub attribute: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Value>| v.as_ref().map_or("<absent>".to_string(), Value::to_string);
        write!(
            f,
            "{} changed out-of-band: expected {}, found {}",
            self.attribute,
            show(&self.expected),
            show(&self.actual)
        )
    }
}

/// Find immutable attributes that changed remotely although the caller did
/// not ask for a change
pub fn detect_drift(
    prior: &Attributes,
    fresh: &Attributes,
    desired: Option<&Attributes>,
    schema: &ResourceSchema,
) -> Vec<Drift> {
    schema
        .iter()
        .filter(|(_, attr)| attr.force_replace)
        .filter_map(|(name, _)| {
            let before = prior.get(name);
            let after = fresh.get(name);
            let intended = desired.map(|d| d.get(name));
            let unintended = match intended {
                None => true,
                Some(wanted) => wanted.is_none() || wanted == before,
            };
            (before != after && unintended).then(|| Drift {
                attribute: name.clone(),
                expected: before.cloned(),
                actual: after.cloned(),
            })
        })
        .collect()
}

/// Key-level difference of two maps, for tag-style delta updates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDelta {
    pub upsert: BTreeMap<String, Value>,
    pub remove: Vec<String>,
}

impl MapDelta {
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }
}

pub fn diff_map(
    old: Option<&BTreeMap<String, Value>>,
    new: Option<&BTreeMap<String, Value>>,
) -> MapDelta {
    let empty = BTreeMap::new();
    let old = old.unwrap_or(&empty);
    let new = new.unwrap_or(&empty);

    MapDelta {
        upsert: new
            .iter()
            .filter(|(k, v)| old.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        remove: old
            .keys()
            .filter(|k| !new.contains_key(*k))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeKind, ScalarKind};
    use crate::value::attributes;

    fn rule_schema() -> ResourceSchema {
        ResourceSchema::builder("rule")
            .attribute("name", Attribute::required(AttributeKind::string()))
            .attribute("port", Attribute::optional(AttributeKind::int()))
            .build()
            .unwrap()
    }

    fn schema() -> ResourceSchema {
        ResourceSchema::builder("instance")
            .attribute("name", Attribute::required(AttributeKind::string()))
            .attribute("size", Attribute::optional(AttributeKind::int()).with_default(10))
            .attribute("zone", Attribute::required(AttributeKind::string()).force_new())
            .attribute("note", Attribute::optional(AttributeKind::string()))
            .attribute(
                "charge_type",
                Attribute::optional_computed(AttributeKind::string()),
            )
            .attribute(
                "tags",
                Attribute::optional(AttributeKind::map_of(ScalarKind::String)).group("tags"),
            )
            .attribute(
                "security_groups",
                Attribute::optional(AttributeKind::set_of(AttributeKind::string())),
            )
            .attribute(
                "dns",
                Attribute::optional(AttributeKind::list_of(AttributeKind::string())),
            )
            .attribute(
                "rules",
                Attribute::optional(AttributeKind::keyed_blocks(rule_schema(), "name")),
            )
            .attribute("status", Attribute::computed(AttributeKind::string()))
            .build()
            .unwrap()
    }

    fn rule(name: &str, port: i64) -> Value {
        Value::Block(attributes([
            ("name", Value::from(name)),
            ("port", Value::from(port)),
        ]))
    }

    fn base() -> Attributes {
        attributes([
            ("name", Value::from("x")),
            ("size", Value::from(10)),
            ("zone", Value::from("a")),
            (
                "security_groups",
                Value::List(vec![Value::from("sg-1"), Value::from("sg-2")]),
            ),
            ("dns", Value::List(vec![Value::from("1.1.1.1"), Value::from("8.8.8.8")])),
            ("rules", Value::List(vec![rule("http", 80), rule("https", 443)])),
        ])
    }

    #[test]
    fn test_identical_inputs_produce_no_changes() {
        let state = base();
        assert!(diff(&state, &state, &schema()).is_empty());
    }

    #[test]
    fn test_diff_is_deterministic() {
        let desired = base();
        let mut observed = base();
        observed.insert("name".into(), Value::from("y"));
        observed.insert("zone".into(), Value::from("b"));
        let first = diff(&desired, &observed, &schema());
        let second = diff(&desired, &observed, &schema());
        assert_eq!(first, second);
    }

    #[test]
    fn test_force_replace_escalates_whole_change_set() {
        let desired = base();
        let mut observed = base();
        observed.insert("zone".into(), Value::from("b"));

        let changes = diff(&desired, &observed, &schema());
        assert_eq!(changes.len(), 1);
        assert!(changes.requires_replace);
        assert_eq!(changes.replace_reasons(), vec!["zone".to_string()]);
    }

    #[test]
    fn test_in_place_change_does_not_replace() {
        let mut desired = base();
        desired.insert("size".into(), Value::from(20));
        let changes = diff(&desired, &base(), &schema());
        assert_eq!(changes.len(), 1);
        assert!(!changes.requires_replace);
        let change = &changes.changes[0];
        assert_eq!(change.path.to_string(), "size");
        assert_eq!(change.old, Some(Value::from(10)));
        assert_eq!(change.new, Some(Value::from(20)));
        assert_eq!(change.update_group, "core");
    }

    #[test]
    fn test_computed_attributes_never_diff() {
        let desired = base();
        let mut observed = base();
        observed.insert("status".into(), Value::from("serving"));
        observed.insert("charge_type".into(), Value::from("POSTPAID"));
        assert!(diff(&desired, &observed, &schema()).is_empty());
    }

    #[test]
    fn test_unset_optional_uses_default() {
        let mut desired = base();
        desired.remove("size");
        assert!(diff(&desired, &base(), &schema()).is_empty());

        let mut observed = base();
        observed.insert("size".into(), Value::from(30));
        let changes = diff(&desired, &observed, &schema());
        assert_eq!(changes.changes[0].new, Some(Value::from(10)));
    }

    #[test]
    fn test_unset_optional_without_default() {
        let desired = base();
        let mut observed = base();
        observed.insert("note".into(), Value::from(""));
        assert!(diff(&desired, &observed, &schema()).is_empty());

        observed.insert("note".into(), Value::from("hello"));
        let changes = diff(&desired, &observed, &schema());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.changes[0].new, None);
        assert_eq!(changes.changes[0].old, Some(Value::from("hello")));
    }

    #[test]
    fn test_unordered_list_ignores_reordering() {
        let desired = base();
        let mut observed = base();
        observed.insert(
            "security_groups".into(),
            Value::List(vec![Value::from("sg-2"), Value::from("sg-1")]),
        );
        assert!(diff(&desired, &observed, &schema()).is_empty());
    }

    #[test]
    fn test_ordered_list_detects_reordering() {
        let desired = base();
        let mut observed = base();
        observed.insert(
            "dns".into(),
            Value::List(vec![Value::from("8.8.8.8"), Value::from("1.1.1.1")]),
        );
        let changes = diff(&desired, &observed, &schema());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.changes[0].path.to_string(), "dns");
    }

    #[test]
    fn test_keyed_blocks_match_by_identity() {
        let desired = base();
        let mut observed = base();
        observed.insert(
            "rules".into(),
            Value::List(vec![rule("https", 443), rule("http", 8080)]),
        );
        let changes = diff(&desired, &observed, &schema());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.changes[0].path.to_string(), "rules[name=http].port");
        assert_eq!(changes.changes[0].old, Some(Value::from(8080)));
    }

    #[test]
    fn test_keyed_blocks_added_and_removed() {
        let mut desired = base();
        desired.insert(
            "rules".into(),
            Value::List(vec![rule("http", 80), rule("grpc", 9000)]),
        );
        let changes = diff(&desired, &base(), &schema());
        let paths: Vec<String> = changes.changes.iter().map(|c| c.path.to_string()).collect();
        assert_eq!(paths, vec!["rules[name=grpc]", "rules[name=https]"]);
        assert_eq!(changes.changes[0].old, None);
        assert_eq!(changes.changes[1].new, None);
    }

    #[test]
    fn test_map_change_lands_in_its_group() {
        let mut desired = base();
        desired.insert(
            "tags".into(),
            Value::Map(BTreeMap::from([("env".to_string(), Value::from("prod"))])),
        );
        let changes = diff(&desired, &base(), &schema());
        assert_eq!(changes.update_groups(), vec!["tags"]);
    }

    #[test]
    fn test_nested_force_replace() {
        let inner = ResourceSchema::builder("network")
            .attribute("vpc_id", Attribute::required(AttributeKind::string()).force_new())
            .attribute("ipv6", Attribute::optional(AttributeKind::bool()))
            .build()
            .unwrap();
        let schema = ResourceSchema::builder("x")
            .attribute("network", Attribute::required(AttributeKind::block(inner)))
            .build()
            .unwrap();

        let net = |vpc: &str, ipv6: bool| {
            attributes([(
                "network",
                Value::Block(attributes([
                    ("vpc_id", Value::from(vpc)),
                    ("ipv6", Value::from(ipv6)),
                ])),
            )])
        };

        let in_place = diff(&net("vpc-1", true), &net("vpc-1", false), &schema);
        assert_eq!(in_place.changes[0].path.to_string(), "network.ipv6");
        assert!(!in_place.requires_replace);

        let replace = diff(&net("vpc-2", false), &net("vpc-1", false), &schema);
        assert!(replace.requires_replace);
    }

    #[test]
    fn test_detect_drift() {
        let prior = base();
        let mut fresh = base();
        fresh.insert("zone".into(), Value::from("c"));

        let drift = detect_drift(&prior, &fresh, Some(&base()), &schema());
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].attribute, "zone");
        assert_eq!(drift[0].actual, Some(Value::from("c")));

        // The user asked for the new value: not drift
        let mut desired = base();
        desired.insert("zone".into(), Value::from("c"));
        assert!(detect_drift(&prior, &fresh, Some(&desired), &schema()).is_empty());
    }

    #[test]
    fn test_unkeyed_block_set_uses_element_rules() {
        let set_schema = ResourceSchema::builder("acl")
            .attribute(
                "rules",
                Attribute::optional(AttributeKind::set_of(AttributeKind::block(rule_schema()))),
            )
            .build()
            .unwrap();
        let desired = attributes([(
            "rules",
            Value::List(vec![
                Value::Block(attributes([("name", Value::from("a"))])),
                rule("b", 443),
            ]),
        )]);
        // remote fills the unset port with its zero value and reorders
        let observed = attributes([("rules", Value::List(vec![rule("b", 443), rule("a", 0)]))]);
        assert!(diff(&desired, &observed, &set_schema).is_empty());

        let moved = attributes([("rules", Value::List(vec![rule("b", 443), rule("a", 8080)]))]);
        let changes = diff(&desired, &moved, &set_schema);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.changes[0].path.to_string(), "rules");
    }

    #[test]
    fn test_diff_map() {
        let old = BTreeMap::from([
            ("a".to_string(), Value::from("1")),
            ("b".to_string(), Value::from("2")),
        ]);
        let new = BTreeMap::from([
            ("a".to_string(), Value::from("1")),
            ("b".to_string(), Value::from("3")),
            ("c".to_string(), Value::from("4")),
        ]);
        let delta = diff_map(Some(&old), Some(&new));
        assert_eq!(delta.upsert.keys().collect::<Vec<_>>(), vec!["b", "c"]);
        assert!(delta.remove.is_empty());

        let delta = diff_map(Some(&new), Some(&old));
        assert_eq!(delta.remove, vec!["c".to_string()]);
        assert!(diff_map(None, None).is_empty());
    }
}
