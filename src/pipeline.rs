use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::crawler::{self, CrawlConfig, CrawlTarget, PageFetcher, PageOutcome};
use crate::db::{PageRow, StoredPage};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::merge::{self, DiagnosticsReport, SpecDocument};
use crate::parser::{self, ExtractConfig, ExtractionResult, PageInput};

const CHUNK: usize = 500;

pub fn page_row(outcome: &PageOutcome) -> PageRow {
    let (markup, status, error) = match &outcome.result {
        Ok(page) => (Some(page.body.clone()), Some(page.status as i32), None),
        Err(e) => (None, None, Some(e.to_string())),
    };
    PageRow {
        endpoint: outcome.target.row_id,
        url: outcome.target.url.clone(),
        endpoint_id: outcome.target.endpoint_id.clone(),
        markup,
        status,
        error,
        attempts: outcome.attempts,
        latency_ms: outcome.latency_ms,
    }
}

/// Extract one page, or record why there is nothing to extract.
fn extract_one(
    endpoint_id: &str,
    markup: Option<&str>,
    error: Option<&str>,
    config: &ExtractConfig,
) -> ExtractionResult {
    match markup {
        Some(markup) => parser::extract_page(
            &PageInput {
                endpoint_id: endpoint_id.to_string(),
                markup: markup.to_string(),
                ..PageInput::default()
            },
            config,
        ),
        None => ExtractionResult::failed(
            endpoint_id,
            Diagnostic::new(
                DiagnosticKind::FetchFailure,
                error.unwrap_or("no markup stored").to_string(),
            ),
        ),
    }
}

/// Extract stored pages in parallel, keyed by their `page_data` id.
pub fn extract_stored(pages: &[StoredPage], config: &ExtractConfig) -> Vec<(i64, ExtractionResult)> {
    pages
        .par_iter()
        .map(|p| {
            let result = extract_one(&p.endpoint_id, p.markup.as_deref(), p.error.as_deref(), config);
            (p.page_data_id, result)
        })
        .collect()
}

pub fn extract_outcomes(outcomes: &[PageOutcome], config: &ExtractConfig) -> Vec<ExtractionResult> {
    let mut results = Vec::with_capacity(outcomes.len());
    for chunk in outcomes.chunks(CHUNK) {
        let batch: Vec<ExtractionResult> = chunk
            .par_iter()
            .map(|o| match &o.result {
                Ok(page) => extract_one(&o.target.endpoint_id, Some(&page.body), None, config),
                Err(e) => extract_one(&o.target.endpoint_id, None, Some(&e.to_string()), config),
            })
            .collect();
        results.extend(batch);
    }
    results
}

/// Crawl, extract and merge without touching the database.
pub async fn run_in_memory<F: PageFetcher>(
    fetcher: Arc<F>,
    targets: Vec<CrawlTarget>,
    crawl: &CrawlConfig,
    extract: &ExtractConfig,
) -> Result<(SpecDocument, DiagnosticsReport)> {
    let mut outcomes = Vec::with_capacity(targets.len());
    crawler::crawl_streaming(fetcher, targets, crawl, |o| {
        outcomes.push(o);
        Ok(())
    })
    .await?;
    let results = extract_outcomes(&outcomes, extract);
    Ok(merge::merge(results))
}

/// Write `openapi.json` and `diagnostics.json` into `out_dir`.
pub fn write_outputs(
    doc: &SpecDocument,
    report: &DiagnosticsReport,
    out_dir: &Path,
    title: &str,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let api_path = out_dir.join("openapi.json");
    let api = doc.to_openapi(title, env!("CARGO_PKG_VERSION"));
    std::fs::write(&api_path, serde_json::to_string_pretty(&api)?)
        .with_context(|| format!("Failed to write {}", api_path.display()))?;

    let report_path = out_dir.join("diagnostics.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;

    Ok((api_path, report_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::tests::{fast, http, ok, target, ScriptedFetcher};
    use crate::parser::ExtractStatus;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[tokio::test]
    async fn one_exhausted_fetch_leaves_the_other_endpoints_intact() {
        let losses = target("assetLosses");
        let update = target("updateSite");
        let broken = target("deleteSite");
        let fetcher = ScriptedFetcher::default()
            .with(&losses.url, vec![ok(&fixture("asset_losses"))])
            .with(&update.url, vec![http(502), ok(&fixture("sparse_rows"))])
            .with(&broken.url, vec![http(503)]);

        let (doc, report) = run_in_memory(
            Arc::new(fetcher),
            vec![losses, update, broken],
            &fast(),
            &ExtractConfig::default(),
        )
        .await
        .unwrap();

        let ids: Vec<&String> = doc.endpoints.keys().collect();
        assert_eq!(ids, vec!["assetLosses", "updateSite"]);
        for r in doc.endpoints.values() {
            assert_eq!(r.status, ExtractStatus::Complete);
            assert!(r.responses.contains_key(&200));
        }
        assert!(doc.endpoints["assetLosses"].responses.contains_key(&400));
        assert!(doc.endpoints["updateSite"].request.body.is_some());

        assert_eq!(report.endpoints.len(), 3);
        let failed = report.endpoint("deleteSite").unwrap();
        assert_eq!(failed.status, ExtractStatus::Failed);
        assert_eq!(failed.diagnostics.len(), 1);
        assert_eq!(failed.diagnostics[0].kind, DiagnosticKind::FetchFailure);
        assert!(failed.diagnostics[0].message.contains("4 attempt(s)"));
    }

    #[test]
    fn stored_pages_without_markup_fail() {
        let pages = vec![
            StoredPage {
                page_data_id: 1,
                endpoint_id: "truncated".into(),
                markup: Some(fixture("truncated")),
                error: None,
            },
            StoredPage {
                page_data_id: 2,
                endpoint_id: "gone".into(),
                markup: None,
                error: Some("permanent fetch failure (HTTP 404)".into()),
            },
        ];
        let results = extract_stored(&pages, &ExtractConfig::default());
        assert_eq!(results[0].0, 1);
        assert_eq!(results[0].1.status, ExtractStatus::Partial);
        assert_eq!(results[1].1.status, ExtractStatus::Failed);
        assert!(results[1].1.diagnostics[0].message.contains("404"));
    }

    #[test]
    fn outputs_are_written() {
        let dir = std::env::temp_dir().join(format!("docschema-out-{}", std::process::id()));
        let (doc, report) = merge::merge(Vec::new());
        let (api_path, diag) = write_outputs(&doc, &report, &dir, "Empty").unwrap();
        let api: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&api_path).unwrap()).unwrap();
        assert_eq!(api["info"]["title"], "Empty");
        assert!(diag.exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
