pub mod classify;
pub mod markup;
pub mod path;
pub mod separator;
pub mod tree;

use std::collections::{BTreeMap, HashSet};

use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Diagnostic, DiagnosticKind};
use crate::schema::{Primitive, SchemaNode};
use classify::{classify, Record};
use markup::{PageMeta, RawElement, Strategy};
use path::{parse_path, Location};
use separator::Route;
use tree::TreeBuilder;

pub const DEFAULT_MIN_ELEMENTS: usize = 10;
pub const DEFAULT_SUCCESS_STATUS: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStatus {
    Complete,
    Partial,
    Failed,
}

impl ExtractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "complete" => Some(Self::Complete),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub location: Location,
    pub schema: SchemaNode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSchema {
    pub parameters: Vec<Parameter>,
    pub body: Option<SchemaNode>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCounts {
    pub primary: usize,
    pub fallback: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub endpoint_id: String,
    pub method: Option<String>,
    pub url_template: Option<String>,
    pub title: Option<String>,
    pub request: RequestSchema,
    /// Main success tree under its 2xx code, error trees under theirs.
    pub responses: BTreeMap<u16, SchemaNode>,
    pub status: ExtractStatus,
    pub diagnostics: Vec<Diagnostic>,
    pub counts: ElementCounts,
}

impl ExtractionResult {
    /// Result for a page whose markup never arrived.
    pub fn failed(endpoint_id: &str, diagnostic: Diagnostic) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            method: None,
            url_template: None,
            title: None,
            request: RequestSchema::default(),
            responses: BTreeMap::new(),
            status: ExtractStatus::Failed,
            diagnostics: vec![diagnostic],
            counts: ElementCounts::default(),
        }
    }
}

/// One fetched page plus whatever the crawler already knows about it.
#[derive(Debug, Clone, Default)]
pub struct PageInput {
    pub endpoint_id: String,
    pub markup: String,
    pub method: Option<String>,
    pub url_template: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractConfig {
    pub min_elements: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_elements: DEFAULT_MIN_ELEMENTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fetched,
    PrimaryExtracted,
    Accepted,
    FallbackAttempted,
    Finalized,
}

struct Machine<'a> {
    endpoint_id: &'a str,
    stage: Stage,
}

impl Machine<'_> {
    fn advance(&mut self, next: Stage) {
        debug!("{}: {:?} -> {:?}", self.endpoint_id, self.stage, next);
        self.stage = next;
    }
}

/// Builders for every tree one page can produce.
#[derive(Default)]
struct Trees {
    seen: HashSet<String>,
    parameters: BTreeMap<Location, TreeBuilder>,
    body: TreeBuilder,
    main: TreeBuilder,
    errors: BTreeMap<u16, TreeBuilder>,
    diagnostics: Vec<Diagnostic>,
}

impl Trees {
    /// Tokenize, classify and route elements not seen before. Returns the
    /// number of usable records added.
    fn absorb(&mut self, elements: Vec<RawElement>, meta: &PageMeta) -> usize {
        let mut added = 0;
        for el in elements {
            if !self.seen.insert(el.attribute_path.clone()) {
                continue;
            }
            let path = match parse_path(&el.attribute_path) {
                Ok(p) => p.coalesce_leaf(&el.display_name),
                Err(e) => {
                    self.diagnostics.push(Diagnostic::from(&e));
                    continue;
                }
            };
            let class = classify(&el, &path);
            if let Some(d) = class.ambiguity {
                self.diagnostics.push(d);
            }
            let record = Record {
                path,
                shape: class.shape,
                description: el.description,
                required: class.required,
                truncated: class.truncated,
                status_heading: el.status_heading,
            };

            match record.path.location {
                loc if loc.is_parameter() => {
                    self.parameters.entry(loc).or_default().insert(&record)
                }
                Location::Body => self.body.insert(&record),
                _ => match separator::route(&record, meta) {
                    Route::Main => self.main.insert(&record),
                    Route::Error(code) => self.errors.entry(code).or_default().insert(&record),
                },
            }
            added += 1;
        }
        added
    }
}

/// Run the primary pass, escalate to the fallback pass when it finds too
/// few elements, and fold everything into one result.
pub fn extract_page(page: &PageInput, config: &ExtractConfig) -> ExtractionResult {
    let mut machine = Machine {
        endpoint_id: &page.endpoint_id,
        stage: Stage::Fetched,
    };

    let doc = Html::parse_document(&page.markup);
    let meta = markup::page_meta(&doc);
    let mut trees = Trees::default();

    let primary = trees.absorb(markup::scan(&doc, Strategy::Primary), &meta);
    machine.advance(Stage::PrimaryExtracted);

    let mut fallback = 0;
    if primary >= config.min_elements {
        machine.advance(Stage::Accepted);
    } else {
        machine.advance(Stage::FallbackAttempted);
        fallback = trees.absorb(markup::scan(&doc, Strategy::Fallback), &meta);
        trees.diagnostics.push(Diagnostic::new(
            DiagnosticKind::InsufficientElements,
            format!(
                "primary pass found {} element(s), below {}; fallback added {}",
                primary, config.min_elements, fallback
            ),
        ));
    }
    let total = primary + fallback;

    let Trees {
        parameters,
        body,
        main,
        errors,
        mut diagnostics,
        ..
    } = trees;

    let mut request = RequestSchema::default();
    for (location, builder) in parameters {
        let (root, diags) = builder.finish();
        diagnostics.extend(diags);
        if let Some(children) = root.children() {
            for (name, schema) in children {
                request.parameters.push(Parameter {
                    name: name.clone(),
                    location,
                    schema: schema.clone(),
                });
            }
        }
    }
    if !body.is_empty() {
        let (root, diags) = body.finish();
        diagnostics.extend(diags);
        request.body = Some(root);
    }

    let success = success_status(&meta);
    let mut responses = BTreeMap::new();
    if !main.is_empty() {
        let (root, diags) = main.finish();
        diagnostics.extend(diags);
        responses.insert(success, root);
    }
    for (code, builder) in errors {
        let (root, diags) = builder.finish();
        diagnostics.extend(diags);
        responses.insert(code, root);
    }

    let mut synthesized = false;
    if !responses.contains_key(&success) {
        if let Some(node) = example_schema(&meta.examples) {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::ExampleFallback,
                format!("{} response built from a JSON example", success),
            ));
            responses.insert(success, node);
            synthesized = true;
        }
    }
    if !responses.contains_key(&success) {
        if let Some((node, fields)) = span_schema(&doc, &mut diagnostics) {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::SpanFallback,
                format!("{} response built from {} Response body field(s)", success, fields),
            ));
            responses.insert(success, node);
            synthesized = true;
        }
    }

    let truncated = diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::TruncatedObject);
    let status = if total == 0 && !synthesized {
        ExtractStatus::Failed
    } else if total >= config.min_elements && !truncated {
        ExtractStatus::Complete
    } else {
        ExtractStatus::Partial
    };
    machine.advance(Stage::Finalized);
    debug!(
        "{}: {} ({} primary, {} fallback, {} schema nodes)",
        page.endpoint_id,
        status.as_str(),
        primary,
        fallback,
        responses.values().map(SchemaNode::node_count).sum::<usize>()
    );

    ExtractionResult {
        endpoint_id: page.endpoint_id.clone(),
        method: page.method.clone().or(meta.method.clone()),
        url_template: page.url_template.clone().or(meta.url.clone()),
        title: page.title.clone().or(meta.title.clone()),
        request,
        responses,
        status,
        diagnostics,
        counts: ElementCounts {
            primary,
            fallback,
            total,
        },
    }
}

/// First 2xx marker on the page, else 200.
fn success_status(meta: &PageMeta) -> u16 {
    meta.status_markers
        .iter()
        .filter_map(|m| markup::parse_status(m))
        .find(|code| (200..=299).contains(code))
        .unwrap_or(DEFAULT_SUCCESS_STATUS)
}

/// Flat object from the names listed under a "Response body" heading.
/// Returns the schema and how many fields went into it.
fn span_schema(doc: &Html, diagnostics: &mut Vec<Diagnostic>) -> Option<(SchemaNode, usize)> {
    let mut builder = TreeBuilder::new();
    let mut fields = 0;
    for el in markup::response_body_spans(doc) {
        let path = match parse_path(&el.attribute_path) {
            Ok(p) => p.coalesce_leaf(&el.display_name),
            Err(e) => {
                diagnostics.push(Diagnostic::from(&e));
                continue;
            }
        };
        let class = classify(&el, &path);
        diagnostics.extend(class.ambiguity);
        builder.insert(&Record {
            path,
            shape: class.shape,
            description: el.description,
            required: class.required,
            truncated: class.truncated,
            status_heading: None,
        });
        fields += 1;
    }
    if builder.is_empty() {
        return None;
    }
    let (root, diags) = builder.finish();
    diagnostics.extend(diags);
    Some((root, fields))
}

/// Largest example block that parses as a JSON object or array.
fn example_schema(examples: &[String]) -> Option<SchemaNode> {
    examples
        .iter()
        .filter_map(|text| serde_json::from_str::<Value>(text).ok().map(|v| (text.len(), v)))
        .filter(|(_, v)| v.is_object() || v.is_array())
        .max_by_key(|(len, _)| *len)
        .map(|(_, v)| schema_from_value(&v))
}

fn schema_from_value(value: &Value) -> SchemaNode {
    match value {
        Value::Null => SchemaNode::scalar(Primitive::Null),
        Value::Bool(_) => SchemaNode::scalar(Primitive::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => SchemaNode::scalar(Primitive::Integer),
        Value::Number(_) => SchemaNode::scalar(Primitive::Number),
        Value::String(_) => SchemaNode::scalar(Primitive::String),
        Value::Array(items) => match items.first() {
            Some(first) => SchemaNode::array(schema_from_value(first)),
            None => SchemaNode::array(SchemaNode::unresolved()),
        },
        Value::Object(map) => SchemaNode::object(
            map.iter()
                .map(|(k, v)| (k.clone(), schema_from_value(v)))
                .collect(),
        ),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{fingerprint, SchemaKind};

    fn page(fixture: &str) -> PageInput {
        let markup = std::fs::read_to_string(format!("tests/fixtures/{}.html", fixture)).unwrap();
        PageInput {
            endpoint_id: fixture.to_string(),
            markup,
            ..PageInput::default()
        }
    }

    fn kinds(r: &ExtractionResult) -> Vec<DiagnosticKind> {
        r.diagnostics.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn full_page_is_complete() {
        let r = extract_page(&page("asset_losses"), &ExtractConfig::default());
        assert_eq!(r.status, ExtractStatus::Complete);
        assert_eq!(r.counts.fallback, 0);
        assert!(r.counts.primary >= 10);
        assert_eq!(r.method.as_deref(), Some("GET"));
        assert_eq!(
            r.url_template.as_deref(),
            Some("https://api.example.com/v1/sites/{site_id}/losses")
        );
        assert_eq!(r.title.as_deref(), Some("Asset losses"));
        assert!(!kinds(&r).contains(&DiagnosticKind::InsufficientElements));
    }

    #[test]
    fn parameters_by_location() {
        let r = extract_page(&page("asset_losses"), &ExtractConfig::default());
        let names: Vec<(&str, Location)> = r
            .request
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.location))
            .collect();
        assert!(names.contains(&("site_id", Location::Path)));
        assert!(names.contains(&("start_time", Location::Query)));
        assert!(names.contains(&("limit", Location::Query)));
        let site = r.request.parameters.iter().find(|p| p.name == "site_id").unwrap();
        assert!(site.schema.required);
        assert_eq!(site.schema.kind, SchemaKind::Scalar { primitive: Primitive::String });
    }

    #[test]
    fn error_records_are_isolated() {
        let r = extract_page(&page("asset_losses"), &ExtractConfig::default());
        let main = &r.responses[&200];
        let containers: Vec<&String> = main.children().unwrap().keys().collect();
        assert_eq!(containers, vec!["data", "query"]);

        let bad = &r.responses[&400];
        assert_eq!(fingerprint(bad), "{message:string}");
        assert!(r.responses.contains_key(&401));
    }

    #[test]
    fn success_tree_shape() {
        let r = extract_page(&page("asset_losses"), &ExtractConfig::default());
        let data = &r.responses[&200].children().unwrap()["data"];
        let item = data.item().expect("data is an array");
        let fields = item.children().unwrap();
        assert_eq!(fields["asset_id"].kind, SchemaKind::Scalar { primitive: Primitive::String });
        assert_eq!(fields["loss_kwh"].kind, SchemaKind::Scalar { primitive: Primitive::Number });
        assert!(fields["device"].item().is_some());
        // item 1 lacks loss_kwh, reported but not merged
        assert!(kinds(&r).contains(&DiagnosticKind::StructuralMismatch));
    }

    #[test]
    fn fallback_escalates_to_complete() {
        let r = extract_page(&page("sparse_rows"), &ExtractConfig::default());
        assert_eq!(r.counts.primary, 3);
        assert_eq!(r.counts.total, 12);
        assert_eq!(r.status, ExtractStatus::Complete);
        assert!(kinds(&r).contains(&DiagnosticKind::InsufficientElements));
        let body = r.request.body.as_ref().unwrap();
        assert!(body.children().unwrap().contains_key("settings"));
    }

    #[test]
    fn fallback_that_stays_short_is_partial() {
        let config = ExtractConfig { min_elements: 20 };
        let r = extract_page(&page("sparse_rows"), &config);
        assert_eq!(r.status, ExtractStatus::Partial);
        assert_eq!(r.counts.total, 12);
    }

    #[test]
    fn truncated_object_downgrades_to_partial() {
        let r = extract_page(&page("truncated"), &ExtractConfig { min_elements: 2 });
        assert!(r.counts.total >= 2);
        assert!(kinds(&r).contains(&DiagnosticKind::TruncatedObject));
        assert_eq!(r.status, ExtractStatus::Partial);
    }

    #[test]
    fn marked_object_with_rendered_fields_is_partial() {
        let r = extract_page(&page("truncated"), &ExtractConfig { min_elements: 2 });
        let data = r.responses[&200].children().unwrap()["data"].children().unwrap();
        assert_eq!(fingerprint(&data["owner"]), "{name:string}");
        assert!(r
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::TruncatedObject && d.message.starts_with("data.owner:")));

        let input = PageInput {
            endpoint_id: "getSite".into(),
            markup: r#"<html><body>
                <div><label for="object-getSite_data_metadata">metadata</label>
                  <span>object</span><span>HAS ADDITIONAL FIELDS</span></div>
                <div><label for="object-getSite_data_metadata_source">source</label>
                  <span>string</span></div>
            </body></html>"#
                .into(),
            ..PageInput::default()
        };
        let r = extract_page(&input, &ExtractConfig { min_elements: 2 });
        assert_eq!(r.counts.total, 2);
        assert_eq!(kinds(&r), vec![DiagnosticKind::TruncatedObject]);
        assert_eq!(r.status, ExtractStatus::Partial);
    }

    #[test]
    fn example_block_fills_missing_success_schema() {
        let r = extract_page(&page("example_only"), &ExtractConfig::default());
        assert_eq!(r.status, ExtractStatus::Partial);
        assert!(kinds(&r).contains(&DiagnosticKind::ExampleFallback));
        assert_eq!(
            fingerprint(&r.responses[&200]),
            "{items:[{id:integer,score:number,tags:[string]}],next:null}"
        );
    }

    #[test]
    fn response_body_spans_fill_missing_success_schema() {
        let r = extract_page(&page("response_body"), &ExtractConfig { min_elements: 1 });
        assert_eq!(r.status, ExtractStatus::Partial);
        assert_eq!(r.counts.total, 0);
        assert!(kinds(&r).contains(&DiagnosticKind::SpanFallback));
        assert_eq!(
            fingerprint(&r.responses[&200]),
            "{last_seen:integer,status:string,uptime:number}"
        );
        let status = &r.responses[&200].children().unwrap()["status"];
        assert_eq!(status.description, "Current device state.");
    }

    #[test]
    fn nothing_recovered_is_failed() {
        let input = PageInput {
            endpoint_id: "blank".into(),
            markup: "<html><body><h1>Nothing here</h1></body></html>".into(),
            ..PageInput::default()
        };
        let r = extract_page(&input, &ExtractConfig::default());
        assert_eq!(r.status, ExtractStatus::Failed);
        assert!(r.responses.is_empty());
        assert_eq!(r.counts.total, 0);
    }

    #[test]
    fn malformed_paths_are_skipped_with_diagnostic() {
        let input = PageInput {
            endpoint_id: "odd".into(),
            markup: r#"<html><body>
                <label for="object-odd_0_x">x</label><div>string</div>
                <label for="object-odd_data_x">x</label><div>string</div>
            </body></html>"#
                .into(),
            ..PageInput::default()
        };
        let r = extract_page(&input, &ExtractConfig { min_elements: 1 });
        assert_eq!(r.counts.total, 1);
        assert!(kinds(&r).contains(&DiagnosticKind::MalformedPath));
        assert_eq!(r.status, ExtractStatus::Complete);
    }

    #[test]
    fn crawler_metadata_wins() {
        let mut input = page("asset_losses");
        input.method = Some("POST".into());
        input.title = Some("Losses".into());
        let r = extract_page(&input, &ExtractConfig::default());
        assert_eq!(r.method.as_deref(), Some("POST"));
        assert_eq!(r.title.as_deref(), Some("Losses"));
    }
}
