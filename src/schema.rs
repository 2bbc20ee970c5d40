use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl Primitive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Primitive::String => "string",
            Primitive::Number => "number",
            Primitive::Integer => "integer",
            Primitive::Boolean => "boolean",
            Primitive::Null => "null",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SchemaKind {
    Scalar { primitive: Primitive },
    Object { children: BTreeMap<String, SchemaNode> },
    Array { item: Box<SchemaNode> },
    /// Declared composite whose fields never rendered.
    Unresolved,
    /// Points into `SpecDocument::shared_components`.
    Reference { component: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaNode {
    #[serde(flatten)]
    pub kind: SchemaKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl SchemaNode {
    pub fn scalar(primitive: Primitive) -> Self {
        Self::with_kind(SchemaKind::Scalar { primitive })
    }

    pub fn object(children: BTreeMap<String, SchemaNode>) -> Self {
        Self::with_kind(SchemaKind::Object { children })
    }

    pub fn array(item: SchemaNode) -> Self {
        Self::with_kind(SchemaKind::Array {
            item: Box::new(item),
        })
    }

    pub fn unresolved() -> Self {
        Self::with_kind(SchemaKind::Unresolved)
    }

    pub fn reference(component: impl Into<String>) -> Self {
        Self::with_kind(SchemaKind::Reference {
            component: component.into(),
        })
    }

    fn with_kind(kind: SchemaKind) -> Self {
        Self {
            kind,
            description: String::new(),
            required: false,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn mark_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn children(&self) -> Option<&BTreeMap<String, SchemaNode>> {
        match &self.kind {
            SchemaKind::Object { children } => Some(children),
            _ => None,
        }
    }

    pub fn item(&self) -> Option<&SchemaNode> {
        match &self.kind {
            SchemaKind::Array { item } => Some(item),
            _ => None,
        }
    }

    /// Number of nodes in the subtree, including this one.
    pub fn node_count(&self) -> usize {
        1 + match &self.kind {
            SchemaKind::Object { children } => children.values().map(|c| c.node_count()).sum(),
            SchemaKind::Array { item } => item.node_count(),
            _ => 0,
        }
    }

    /// Render as an OpenAPI 3.0 schema object. References point at
    /// `#/components/schemas/<id>`.
    pub fn to_openapi(&self) -> Value {
        let mut out = Map::new();
        match &self.kind {
            SchemaKind::Reference { component } => {
                return json!({ "$ref": format!("#/components/schemas/{}", component) });
            }
            SchemaKind::Scalar { primitive: Primitive::Null } => {
                // 3.0 has no null type; only null values were ever seen
                out.insert("type".into(), json!(Primitive::String.as_str()));
                out.insert("nullable".into(), json!(true));
            }
            SchemaKind::Scalar { primitive } => {
                out.insert("type".into(), json!(primitive.as_str()));
            }
            SchemaKind::Object { children } => {
                out.insert("type".into(), json!("object"));
                let required: Vec<&String> = children
                    .iter()
                    .filter(|(_, c)| c.required)
                    .map(|(name, _)| name)
                    .collect();
                let props: Map<String, Value> = children
                    .iter()
                    .map(|(name, c)| (name.clone(), c.to_openapi()))
                    .collect();
                out.insert("properties".into(), Value::Object(props));
                if !required.is_empty() {
                    out.insert("required".into(), json!(required));
                }
            }
            SchemaKind::Array { item } => {
                out.insert("type".into(), json!("array"));
                out.insert("items".into(), item.to_openapi());
            }
            SchemaKind::Unresolved => {
                out.insert("type".into(), json!("object"));
                out.insert("additionalProperties".into(), json!(true));
            }
        }
        if !self.description.is_empty() {
            out.insert("description".into(), json!(self.description));
        }
        Value::Object(out)
    }
}

// ── Fingerprints ──

/// Canonical serialization of a subtree's shape.
///
/// Covers kinds, primitive types, property names and the required flags of
/// children. Descriptions and the node's own required flag are excluded, so
/// two identically shaped objects under different property names (or with
/// different wording) fingerprint the same. Children are visited in sorted
/// order, making the result independent of insertion order.
pub fn fingerprint(node: &SchemaNode) -> String {
    let mut out = String::new();
    write_fingerprint(node, &mut out);
    out
}

fn write_fingerprint(node: &SchemaNode, out: &mut String) {
    match &node.kind {
        SchemaKind::Scalar { primitive } => out.push_str(primitive.as_str()),
        SchemaKind::Unresolved => out.push('?'),
        SchemaKind::Reference { component } => {
            out.push('$');
            out.push_str(component);
        }
        SchemaKind::Array { item } => {
            out.push('[');
            write_fingerprint(item, out);
            out.push(']');
        }
        SchemaKind::Object { children } => {
            out.push('{');
            for (i, (name, child)) in children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&escape_name(name));
                if child.required {
                    out.push('!');
                }
                out.push(':');
                write_fingerprint(child, out);
            }
            out.push('}');
        }
    }
}

fn escape_name(name: &str) -> String {
    name.chars()
        .flat_map(|c| match c {
            '\\' | ',' | ':' | '!' | '{' | '}' | '[' | ']' => vec!['\\', c],
            c => vec![c],
        })
        .collect()
}

/// Shape equality ignoring descriptions and required flags; used to compare
/// array items recovered under different indices.
pub fn same_shape(a: &SchemaNode, b: &SchemaNode) -> bool {
    match (&a.kind, &b.kind) {
        (SchemaKind::Scalar { primitive: x }, SchemaKind::Scalar { primitive: y }) => x == y,
        (SchemaKind::Unresolved, SchemaKind::Unresolved) => true,
        (SchemaKind::Reference { component: x }, SchemaKind::Reference { component: y }) => x == y,
        (SchemaKind::Array { item: x }, SchemaKind::Array { item: y }) => same_shape(x, y),
        (SchemaKind::Object { children: x }, SchemaKind::Object { children: y }) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((kx, vx), (ky, vy))| kx == ky && same_shape(vx, vy))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: Vec<(&str, SchemaNode)>) -> SchemaNode {
        SchemaNode::object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn fingerprint_ignores_descriptions_and_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("id".to_string(), SchemaNode::scalar(Primitive::Integer).describe("Asset id"));
        a.insert("name".to_string(), SchemaNode::scalar(Primitive::String));
        let mut b = BTreeMap::new();
        b.insert("name".to_string(), SchemaNode::scalar(Primitive::String).describe("Label"));
        b.insert("id".to_string(), SchemaNode::scalar(Primitive::Integer));

        assert_eq!(
            fingerprint(&SchemaNode::object(a)),
            fingerprint(&SchemaNode::object(b).describe("other"))
        );
    }

    #[test]
    fn fingerprint_distinguishes_types_and_required() {
        let a = obj(vec![("id", SchemaNode::scalar(Primitive::Integer))]);
        let b = obj(vec![("id", SchemaNode::scalar(Primitive::String))]);
        let c = obj(vec![("id", SchemaNode::scalar(Primitive::Integer).mark_required(true))]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
        assert_eq!(fingerprint(&a), "{id:integer}");
        assert_eq!(fingerprint(&c), "{id!:integer}");
    }

    #[test]
    fn fingerprint_escapes_delimiters_in_names() {
        let a = obj(vec![("a:b", SchemaNode::scalar(Primitive::String))]);
        let b = obj(vec![(
            "a",
            SchemaNode::scalar(Primitive::String),
        )]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a), "{a\\:b:string}");
    }

    #[test]
    fn fingerprint_nested_array() {
        let node = obj(vec![(
            "data",
            SchemaNode::array(obj(vec![("x", SchemaNode::scalar(Primitive::Number))])),
        )]);
        assert_eq!(fingerprint(&node), "{data:[{x:number}]}");
    }

    #[test]
    fn same_shape_ignores_required() {
        let a = obj(vec![("x", SchemaNode::scalar(Primitive::String).mark_required(true))]);
        let b = obj(vec![("x", SchemaNode::scalar(Primitive::String))]);
        let c = obj(vec![("y", SchemaNode::scalar(Primitive::String))]);
        assert!(same_shape(&a, &b));
        assert!(!same_shape(&a, &c));
    }

    #[test]
    fn openapi_object_lists_required_children() {
        let node = obj(vec![
            ("id", SchemaNode::scalar(Primitive::Integer).mark_required(true)),
            ("tags", SchemaNode::array(SchemaNode::scalar(Primitive::String))),
        ]);
        let v = node.to_openapi();
        assert_eq!(v["type"], "object");
        assert_eq!(v["required"], json!(["id"]));
        assert_eq!(v["properties"]["tags"]["items"]["type"], "string");
    }

    #[test]
    fn openapi_reference_and_unresolved() {
        let r = SchemaNode::reference("Asset").to_openapi();
        assert_eq!(r, json!({ "$ref": "#/components/schemas/Asset" }));
        let u = SchemaNode::unresolved().describe("Has additional fields").to_openapi();
        assert_eq!(u["additionalProperties"], json!(true));
        assert_eq!(u["description"], "Has additional fields");
    }

    #[test]
    fn openapi_null_still_has_a_type() {
        let v = SchemaNode::scalar(Primitive::Null).to_openapi();
        assert_eq!(v, json!({ "type": "string", "nullable": true }));
    }

    #[test]
    fn serde_roundtrip_keeps_kind_tag() {
        let node = obj(vec![("x", SchemaNode::scalar(Primitive::Boolean))]);
        let text = serde_json::to_string(&node).unwrap();
        assert!(text.contains("\"kind\":\"object\""));
        let back: SchemaNode = serde_json::from_str(&text).unwrap();
        assert_eq!(back, node);
    }
}
