use crate::error::{Diagnostic, DiagnosticKind};
use crate::schema::Primitive;

use super::markup::{ElementKind, RawElement};
use super::path::ParsedPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemShape {
    Object,
    Scalar(Primitive),
}

/// What a single element says about the node at its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar(Primitive),
    Object,
    Array(ItemShape),
}

impl Shape {
    /// Composite shapes win over scalars when two records disagree.
    pub fn rank(&self) -> u8 {
        match self {
            Shape::Scalar(_) => 0,
            Shape::Object => 1,
            Shape::Array(_) => 2,
        }
    }
}

/// Cardinality indicators, matched in order against the element's local
/// context. First match wins.
pub const SHAPE_INDICATORS: &[(&str, Shape)] = &[
    ("array of objects", Shape::Array(ItemShape::Object)),
    ("array of strings", Shape::Array(ItemShape::Scalar(Primitive::String))),
    ("array of integers", Shape::Array(ItemShape::Scalar(Primitive::Integer))),
    ("array of numbers", Shape::Array(ItemShape::Scalar(Primitive::Number))),
    ("array of booleans", Shape::Array(ItemShape::Scalar(Primitive::Boolean))),
    ("array", Shape::Array(ItemShape::Scalar(Primitive::String))),
    ("object", Shape::Object),
];

/// Scalar type keywords, checked in order once no shape indicator matched.
pub const PRIMITIVE_INDICATORS: &[(&str, Primitive)] = &[
    ("integer", Primitive::Integer),
    ("int32", Primitive::Integer),
    ("int64", Primitive::Integer),
    ("boolean", Primitive::Boolean),
    ("number", Primitive::Number),
    ("float", Primitive::Number),
    ("double", Primitive::Number),
    ("null", Primitive::Null),
    ("string", Primitive::String),
];

/// Badges saying the docs collapsed part of an object's fields.
pub const TRUNCATION_MARKERS: &[&str] = &["has additional fields"];

/// A classified element, ready for the tree builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub path: ParsedPath,
    pub shape: Shape,
    pub description: String,
    pub required: bool,
    /// Rendered fields are only part of the object.
    pub truncated: bool,
    pub status_heading: Option<String>,
}

pub struct Classification {
    pub shape: Shape,
    pub required: bool,
    pub truncated: bool,
    pub ambiguity: Option<Diagnostic>,
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// True when the space-separated `phrase` occurs as consecutive words.
fn contains_phrase(haystack: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split(' ').collect();
    haystack
        .windows(needle.len())
        .any(|w| w.iter().zip(&needle).all(|(a, b)| a == b))
}

pub fn match_shape(context: &str) -> Option<Shape> {
    let ws = words(context);
    SHAPE_INDICATORS
        .iter()
        .find(|(phrase, _)| contains_phrase(&ws, phrase))
        .map(|(_, shape)| *shape)
}

pub fn match_primitive(context: &str) -> Option<Primitive> {
    let ws = words(context);
    PRIMITIVE_INDICATORS
        .iter()
        .find(|(phrase, _)| contains_phrase(&ws, phrase))
        .map(|(_, p)| *p)
}

pub fn has_truncation_marker(context: &str) -> bool {
    let ws = words(context);
    TRUNCATION_MARKERS.iter().any(|m| contains_phrase(&ws, m))
}

/// Explicit `required` marker; `not required` does not count.
pub fn has_required_marker(text: &str) -> bool {
    let ws = words(text);
    ws.iter()
        .enumerate()
        .any(|(i, w)| w == "required" && (i == 0 || ws[i - 1] != "not"))
}

pub fn classify(element: &RawElement, path: &ParsedPath) -> Classification {
    let required =
        has_required_marker(&element.local_context) || has_required_marker(&element.description);
    let truncated = has_truncation_marker(&element.local_context);

    if element.kind == ElementKind::ContainerSpan {
        let shape = match match_shape(&element.local_context) {
            Some(Shape::Array(item)) => Shape::Array(item),
            _ => Shape::Object,
        };
        return Classification {
            shape,
            required,
            truncated,
            ambiguity: None,
        };
    }

    if let Some(shape) = match_shape(&element.local_context) {
        return Classification {
            shape,
            required,
            truncated,
            ambiguity: None,
        };
    }

    match match_primitive(&element.local_context) {
        Some(p) => Classification {
            shape: Shape::Scalar(p),
            required,
            truncated,
            ambiguity: None,
        },
        None => Classification {
            shape: Shape::Scalar(Primitive::String),
            required,
            truncated,
            ambiguity: Some(Diagnostic::new(
                DiagnosticKind::TypeInferenceAmbiguity,
                format!(
                    "{}: no type indicator in {:?}, defaulting to string",
                    path.to_attribute_path(),
                    element.local_context
                ),
            )),
        },
    }
}
