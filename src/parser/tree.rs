use std::collections::BTreeMap;

use crate::error::{Diagnostic, DiagnosticKind};
use crate::schema::{same_shape, SchemaNode};

use super::classify::{ItemShape, Record, Shape};

/// Mutable intermediate node. Arrays keep one draft per index seen so the
/// canonical item can be chosen after every record is in.
#[derive(Debug, Default)]
struct Draft {
    shape: Option<Shape>,
    description: String,
    required: bool,
    truncated: bool,
    children: BTreeMap<String, Draft>,
    items: BTreeMap<u32, Draft>,
}

fn shape_key(shape: &Shape) -> (u8, u8) {
    let sub = match shape {
        Shape::Scalar(p) => *p as u8,
        Shape::Object => 0,
        Shape::Array(ItemShape::Object) => 0,
        Shape::Array(ItemShape::Scalar(p)) => 1 + *p as u8,
    };
    (shape.rank(), sub)
}

impl Draft {
    /// Order-independent merge of one record into this node.
    fn absorb(&mut self, record: &Record) {
        let (shape, description) = (record.shape, record.description.as_str());
        self.shape = Some(match self.shape {
            Some(cur) if shape_key(&cur) >= shape_key(&shape) => cur,
            _ => shape,
        });
        let longer = description.len() > self.description.len()
            || (description.len() == self.description.len()
                && description < self.description.as_str());
        if longer {
            self.description = description.to_string();
        }
        self.required |= record.required;
        self.truncated |= record.truncated;
    }
}

/// Folds classified records for one tree (request body, success response, or
/// one error status) into a nested schema.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    root: Draft,
    records: usize,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn insert(&mut self, record: &Record) {
        let mut node = &mut self.root;
        for seg in &record.path.segments {
            if !seg.name.is_empty() {
                node = node.children.entry(seg.name.clone()).or_default();
            }
            if let Some(idx) = seg.array_index {
                node = node.items.entry(idx).or_default();
            }
        }
        node.absorb(record);
        self.records += 1;
    }

    /// Finalize into an object whose children are the containers seen.
    pub fn finish(self) -> (SchemaNode, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let children = self
            .root
            .children
            .into_iter()
            .map(|(name, draft)| {
                let node = finish_draft(draft, &name, &mut diagnostics);
                (name, node)
            })
            .collect();
        (SchemaNode::object(children), diagnostics)
    }
}

fn finish_children(
    children: BTreeMap<String, Draft>,
    at: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> BTreeMap<String, SchemaNode> {
    children
        .into_iter()
        .map(|(name, draft)| {
            let path = format!("{}.{}", at, name);
            let node = finish_draft(draft, &path, diagnostics);
            (name, node)
        })
        .collect()
}

fn finish_draft(draft: Draft, at: &str, diagnostics: &mut Vec<Diagnostic>) -> SchemaNode {
    let Draft {
        shape,
        description,
        required,
        truncated,
        children,
        mut items,
    } = draft;
    // empty objects are reported further down
    if truncated && !(children.is_empty() && items.is_empty()) {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::TruncatedObject,
            format!("{}: has additional fields that were not rendered", at),
        ));
    }

    let node = if let Some(first) = items.keys().next().copied() {
        if !children.is_empty() {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::StructuralMismatch,
                format!(
                    "{}: unindexed fields {:?} next to indexed items were dropped",
                    at,
                    children.keys().collect::<Vec<_>>()
                ),
            ));
        }
        let canonical_draft = items.remove(&first).unwrap_or_default();
        let canonical = finish_draft(canonical_draft, &format!("{}[{}]", at, first), diagnostics);
        for (idx, other) in items {
            // only the canonical item reaches the output, so inner findings are discarded
            let mut scratch = Vec::new();
            let candidate = finish_draft(other, &format!("{}[{}]", at, idx), &mut scratch);
            if !same_shape(&canonical, &candidate) {
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::StructuralMismatch,
                    format!("{}[{}] differs from canonical {}[{}]", at, idx, at, first),
                ));
            }
        }
        SchemaNode::array(canonical)
    } else if !children.is_empty() {
        let props = finish_children(children, at, diagnostics);
        match shape {
            Some(Shape::Array(_)) => SchemaNode::array(SchemaNode::object(props)),
            _ => SchemaNode::object(props),
        }
    } else {
        match shape {
            Some(Shape::Scalar(p)) => SchemaNode::scalar(p),
            Some(Shape::Array(ItemShape::Scalar(p))) => SchemaNode::array(SchemaNode::scalar(p)),
            Some(Shape::Array(ItemShape::Object)) => {
                diagnostics.push(unrendered(at));
                SchemaNode::array(SchemaNode::unresolved())
            }
            Some(Shape::Object) | None => {
                diagnostics.push(unrendered(at));
                SchemaNode::unresolved()
            }
        }
    };

    node.describe(description).mark_required(required)
}

fn unrendered(at: &str) -> Diagnostic {
    Diagnostic::new(
        DiagnosticKind::TruncatedObject,
        format!("{}: declared as object but no fields were rendered", at),
    )
}
