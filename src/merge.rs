use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::{Diagnostic, DiagnosticKind};
use crate::parser::path::Location;
use crate::parser::{ElementCounts, ExtractStatus, ExtractionResult};
use crate::schema::{fingerprint, SchemaKind, SchemaNode};

pub const OPENAPI_VERSION: &str = "3.0.3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecDocument {
    /// Endpoints that produced at least a partial result.
    pub endpoints: BTreeMap<String, ExtractionResult>,
    pub shared_components: BTreeMap<String, SchemaNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointReport {
    pub endpoint_id: String,
    pub status: ExtractStatus,
    pub counts: ElementCounts,
    pub diagnostics: Vec<Diagnostic>,
}

/// Per-endpoint review list, failed endpoints included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub generated_at: DateTime<Utc>,
    pub shared_components: usize,
    pub endpoints: Vec<EndpointReport>,
}

impl DiagnosticsReport {
    pub fn count(&self, status: ExtractStatus) -> usize {
        self.endpoints.iter().filter(|e| e.status == status).count()
    }

    pub fn endpoint(&self, endpoint_id: &str) -> Option<&EndpointReport> {
        self.endpoints.iter().find(|e| e.endpoint_id == endpoint_id)
    }
}

/// Combine per-page results into one document, pulling every object shape
/// that occurs more than once into `shared_components`.
///
/// Output depends only on the set of results, not their order.
pub fn merge(mut results: Vec<ExtractionResult>) -> (SpecDocument, DiagnosticsReport) {
    results.sort_by_cached_key(|r| {
        (
            r.endpoint_id.clone(),
            serde_json::to_string(r).unwrap_or_default(),
        )
    });

    let mut kept: Vec<ExtractionResult> = Vec::new();
    let mut reports: Vec<EndpointReport> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_ops: HashSet<(String, String)> = HashSet::new();

    for mut result in results {
        if !seen_ids.insert(result.endpoint_id.clone()) {
            warn!("Duplicate endpoint {} dropped", result.endpoint_id);
            if let Some(first) = reports.iter_mut().find(|r| r.endpoint_id == result.endpoint_id) {
                first.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::DuplicateOperation,
                    format!("endpoint {} appeared more than once", result.endpoint_id),
                ));
            }
            continue;
        }
        if result.status != ExtractStatus::Failed && !seen_ops.insert(operation_key(&result)) {
            let (path, method) = operation_key(&result);
            result.diagnostics.push(Diagnostic::new(
                DiagnosticKind::DuplicateOperation,
                format!("{} {} already documented by another endpoint", method, path),
            ));
        }
        reports.push(EndpointReport {
            endpoint_id: result.endpoint_id.clone(),
            status: result.status,
            counts: result.counts,
            diagnostics: result.diagnostics.clone(),
        });
        if result.status != ExtractStatus::Failed {
            kept.push(result);
        }
    }

    // ── Occurrence census ──

    let mut census: BTreeMap<String, (usize, BTreeSet<String>)> = BTreeMap::new();
    for result in &kept {
        visit_trees(result, |hint, node| count_objects(node, hint, &mut census));
    }

    let mut ids: BTreeMap<String, String> = BTreeMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    for (fp, (count, hints)) in &census {
        if *count < 2 {
            continue;
        }
        let base = hints
            .iter()
            .next()
            .map(|h| pascal_case(h))
            .unwrap_or_else(|| "Schema".to_string());
        let mut id = base.clone();
        let mut n = 2;
        while !taken.insert(id.clone()) {
            id = format!("{}{}", base, n);
            n += 1;
        }
        ids.insert(fp.clone(), id);
    }

    // ── Rewrite ──

    let mut components: BTreeMap<String, SchemaNode> = BTreeMap::new();
    let mut endpoints = BTreeMap::new();
    for mut result in kept {
        for param in &mut result.request.parameters {
            param.schema = rewrite(&param.schema, &ids, &mut components);
        }
        if let Some(body) = &result.request.body {
            result.request.body = Some(rewrite(body, &ids, &mut components));
        }
        result.responses = result
            .responses
            .iter()
            .map(|(code, node)| (*code, rewrite(node, &ids, &mut components)))
            .collect();
        endpoints.insert(result.endpoint_id.clone(), result);
    }

    info!(
        "Merged {} endpoints, {} shared components",
        endpoints.len(),
        components.len()
    );

    let report = DiagnosticsReport {
        generated_at: Utc::now(),
        shared_components: components.len(),
        endpoints: reports,
    };
    (
        SpecDocument {
            endpoints,
            shared_components: components,
        },
        report,
    )
}

/// Calls `f` on every schema root of a result with a name hint for it.
fn visit_trees(result: &ExtractionResult, mut f: impl FnMut(&str, &SchemaNode)) {
    for param in &result.request.parameters {
        f(&param.name, &param.schema);
    }
    if let Some(body) = &result.request.body {
        f(&format!("{}_request", result.endpoint_id), body);
    }
    for (code, node) in &result.responses {
        let hint = if (200..=299).contains(code) {
            format!("{}_response", result.endpoint_id)
        } else {
            format!("error_{}", code)
        };
        f(&hint, node);
    }
}

fn count_objects(
    node: &SchemaNode,
    hint: &str,
    census: &mut BTreeMap<String, (usize, BTreeSet<String>)>,
) {
    match &node.kind {
        SchemaKind::Object { children } if !children.is_empty() => {
            let entry = census.entry(fingerprint(node)).or_default();
            entry.0 += 1;
            entry.1.insert(hint.to_string());
            for (name, child) in children {
                count_objects(child, name, census);
            }
        }
        SchemaKind::Array { item } => count_objects(item, hint, census),
        _ => {}
    }
}

fn rewrite(
    node: &SchemaNode,
    ids: &BTreeMap<String, String>,
    components: &mut BTreeMap<String, SchemaNode>,
) -> SchemaNode {
    match &node.kind {
        SchemaKind::Object { children } if !children.is_empty() => {
            let fp = fingerprint(node);
            let rebuilt = SchemaNode::object(
                children
                    .iter()
                    .map(|(name, child)| (name.clone(), rewrite(child, ids, components)))
                    .collect(),
            );
            match ids.get(&fp) {
                Some(id) => {
                    // first occurrence in sorted order supplies the wording
                    components
                        .entry(id.clone())
                        .or_insert_with(|| rebuilt.describe(node.description.clone()));
                    SchemaNode::reference(id.clone())
                        .describe(node.description.clone())
                        .mark_required(node.required)
                }
                None => rebuilt
                    .describe(node.description.clone())
                    .mark_required(node.required),
            }
        }
        SchemaKind::Array { item } => SchemaNode::array(rewrite(item, ids, components))
            .describe(node.description.clone())
            .mark_required(node.required),
        _ => node.clone(),
    }
}

/// `assetLosses_response` → `AssetLossesResponse`.
pub fn pascal_case(hint: &str) -> String {
    let mut out = String::new();
    for part in hint.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "Schema");
    }
    out
}

/// Path portion of the URL template (or the endpoint id) plus lowercase method.
fn operation_key(result: &ExtractionResult) -> (String, String) {
    let path = result
        .url_template
        .as_deref()
        .map(url_path)
        .unwrap_or_else(|| format!("/{}", result.endpoint_id));
    let method = result
        .method
        .as_deref()
        .unwrap_or("get")
        .to_ascii_lowercase();
    (path, method)
}

fn url_path(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = match without_scheme.find('/') {
        Some(i) => &without_scheme[i..],
        None => "/",
    };
    path.split('?').next().unwrap_or(path).to_string()
}

fn server_url(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let host = rest.split('/').next()?;
    Some(format!("{}://{}", scheme, host))
}

// ── OpenAPI rendering ──

impl SpecDocument {
    pub fn to_openapi(&self, title: &str, version: &str) -> Value {
        let mut paths: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        let mut servers: BTreeSet<String> = BTreeSet::new();

        for result in self.endpoints.values() {
            let (path, method) = operation_key(result);
            let ops = paths.entry(path).or_default();
            if ops.contains_key(&method) {
                continue;
            }
            if let Some(server) = result.url_template.as_deref().and_then(server_url) {
                servers.insert(server);
            }
            ops.insert(method, operation(result));
        }

        let schemas: Map<String, Value> = self
            .shared_components
            .iter()
            .map(|(id, node)| (id.clone(), node.to_openapi()))
            .collect();

        let mut doc = json!({
            "openapi": OPENAPI_VERSION,
            "info": { "title": title, "version": version },
            "paths": paths,
            "components": { "schemas": schemas },
        });
        if !servers.is_empty() {
            doc["servers"] = servers.iter().map(|s| json!({ "url": s })).collect();
        }
        doc
    }
}

fn operation(result: &ExtractionResult) -> Value {
    let mut op = Map::new();
    op.insert("operationId".into(), json!(result.endpoint_id));
    if let Some(title) = &result.title {
        op.insert("summary".into(), json!(title));
    }

    let params: Vec<Value> = result
        .request
        .parameters
        .iter()
        .map(|p| {
            let mut v = json!({
                "name": p.name,
                "in": p.location.as_prefix(),
                "required": p.schema.required || p.location == Location::Path,
                "schema": p.schema.to_openapi(),
            });
            if !p.schema.description.is_empty() {
                v["description"] = json!(p.schema.description);
            }
            v
        })
        .collect();
    if !params.is_empty() {
        op.insert("parameters".into(), Value::Array(params));
    }

    if let Some(body) = &result.request.body {
        op.insert(
            "requestBody".into(),
            json!({ "content": { "application/json": { "schema": body.to_openapi() } } }),
        );
    }

    let mut responses = Map::new();
    for (code, node) in &result.responses {
        let description = if (200..=299).contains(code) {
            "Success"
        } else {
            "Error"
        };
        responses.insert(
            code.to_string(),
            json!({
                "description": description,
                "content": { "application/json": { "schema": node.to_openapi() } },
            }),
        );
    }
    if responses.is_empty() {
        responses.insert(
            "default".into(),
            json!({ "description": "No response schema recovered" }),
        );
    }
    op.insert("responses".into(), Value::Object(responses));
    Value::Object(op)
}
