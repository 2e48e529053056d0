//! Type sketches from one observed response.
//!
//! Shapes are keyed by bare field name, so the last occurrence of a name in a
//! walk wins. This is a sketch of what was seen, not a type system.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use digger_types::{ListElement, PrimitiveKind, TypeNode};

use crate::InferenceLimits;

/// Walk the top-level `data` object of `response` and overwrite `types` with every key's shape.
///
/// Responses without a `data` object (errors-only, batched arrays) leave `types` untouched.
pub fn fold_response(types: &mut BTreeMap<String, TypeNode>, response: &Value, limits: &InferenceLimits) {
    if let Some(Value::Object(data)) = response.get("data") {
        walk(types, data, limits, 0);
    }
}

fn walk(types: &mut BTreeMap<String, TypeNode>, object: &Map<String, Value>, limits: &InferenceLimits, depth: usize) {
    if depth >= limits.max_depth {
        return;
    }
    for (key, value) in object {
        types.insert(key.clone(), describe_at(value, limits, depth));
        descend(types, value, limits, depth + 1);
    }
}

// Lists are only sampled through their first element.
fn descend(types: &mut BTreeMap<String, TypeNode>, value: &Value, limits: &InferenceLimits, depth: usize) {
    match value {
        Value::Object(object) => walk(types, object, limits, depth),
        Value::Array(items) if depth < limits.max_depth => {
            if let Some(first) = items.first() {
                descend(types, first, limits, depth + 1);
            }
        }
        _ => {}
    }
}

/// Shape of a single value.
pub fn describe(value: &Value, limits: &InferenceLimits) -> TypeNode {
    describe_at(value, limits, 0)
}

fn describe_at(value: &Value, limits: &InferenceLimits, depth: usize) -> TypeNode {
    match value {
        Value::Object(object) => TypeNode::ObjectShape {
            field_names: object.keys().cloned().collect(),
        },
        Value::Array(items) => TypeNode::ListOf {
            element: element_of(items, limits, depth + 1),
        },
        scalar => TypeNode::Scalar {
            kind: primitive_kind(scalar),
            sample: sample(scalar, limits.sample_chars),
        },
    }
}

fn element_of(items: &[Value], limits: &InferenceLimits, depth: usize) -> ListElement {
    match items.first() {
        None => ListElement::Primitive(PrimitiveKind::Unknown),
        Some(nested @ (Value::Object(_) | Value::Array(_))) if depth < limits.max_depth => {
            ListElement::Node(Box::new(describe_at(nested, limits, depth)))
        }
        Some(Value::Object(_) | Value::Array(_)) => ListElement::Primitive(PrimitiveKind::Unknown),
        Some(scalar) => ListElement::Primitive(primitive_kind(scalar)),
    }
}

fn primitive_kind(value: &Value) -> PrimitiveKind {
    match value {
        Value::String(_) => PrimitiveKind::String,
        Value::Number(_) => PrimitiveKind::Number,
        Value::Bool(_) => PrimitiveKind::Boolean,
        Value::Null => PrimitiveKind::Null,
        Value::Object(_) | Value::Array(_) => PrimitiveKind::Unknown,
    }
}

fn sample(value: &Value, max_chars: usize) -> String {
    match value {
        Value::String(s) => s.chars().take(max_chars).collect(),
        other => other.to_string().chars().take(max_chars).collect(),
    }
}
