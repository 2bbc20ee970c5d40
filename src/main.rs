mod config;
mod crawler;
mod db;
mod error;
mod merge;
mod parser;
mod pipeline;
mod schema;
mod sitemap;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;

use config::Config;
use parser::ExtractStatus;

#[derive(Parser)]
#[command(name = "docschema", about = "Recover API schemas from rendered reference docs")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue endpoint pages from a sitemap and/or explicit URLs
    Init {
        /// Sitemap listing /reference/<slug> pages
        #[arg(long)]
        sitemap: Option<String>,
        /// Endpoint page URL (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,
    },
    /// Fetch unvisited endpoint pages
    Crawl {
        /// Max pages to fetch (default: all unvisited)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract schemas from fetched pages
    Extract {
        /// Max pages to extract (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Merge all extractions into an OpenAPI document and diagnostics report
    Merge {
        /// Output directory
        #[arg(short, long, default_value = "out")]
        out: PathBuf,
        /// Document title
        #[arg(long, default_value = "API Reference")]
        title: String,
    },
    /// Crawl + extract + merge
    Run {
        /// Max pages to fetch
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(short, long, default_value = "out")]
        out: PathBuf,
        #[arg(long, default_value = "API Reference")]
        title: String,
    },
    /// Crawl, extract and merge the given URLs in memory, skipping the database
    Probe {
        /// Endpoint page URL (repeatable)
        #[arg(long = "url", required = true)]
        urls: Vec<String>,
        #[arg(short, long, default_value = "out")]
        out: PathBuf,
        #[arg(long, default_value = "API Reference")]
        title: String,
    },
    /// Show pipeline statistics
    Stats,
    /// Per-endpoint extraction status table
    Report {
        /// Filter by status (complete, partial, failed)
        #[arg(short, long)]
        status: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = cli.config;
    config.validate()?;

    if let Commands::Probe { urls, out, title } = cli.command {
        return probe(&config, urls, &out, &title).await;
    }

    let conn = db::connect(&config.db)?;
    db::init_schema(&conn)?;

    let result = match cli.command {
        Commands::Probe { .. } => unreachable!("handled above"),
        Commands::Init { sitemap, urls } => {
            if sitemap.is_none() && urls.is_empty() {
                bail!("Pass --sitemap and/or --url");
            }
            let mut endpoints = Vec::new();
            if let Some(sitemap_url) = sitemap {
                let client = reqwest::Client::new();
                endpoints.extend(sitemap::discover(&client, &sitemap_url).await?);
            }
            for url in urls {
                match sitemap::endpoint_id_from_url(&url) {
                    Some(id) => endpoints.push((url, id)),
                    None => bail!("Cannot derive an endpoint id from {}", url),
                }
            }
            let inserted = db::insert_endpoints(&conn, &endpoints)?;
            println!("Inserted {} new endpoints ({} total found)", inserted, endpoints.len());
            Ok(())
        }
        Commands::Crawl { limit } => {
            let stats = crawl(&conn, &config, limit).await?;
            if let Some(s) = stats {
                println!("Done: {} fetched ({} ok, {} errors).", s.total, s.ok, s.errors);
            }
            Ok(())
        }
        Commands::Extract { limit } => {
            let counts = extract(&conn, &config, limit)?;
            counts.print();
            Ok(())
        }
        Commands::Merge { out, title } => merge_outputs(&conn, &out, &title),
        Commands::Run { limit, out, title } => {
            let t_crawl = Instant::now();
            if let Some(s) = crawl(&conn, &config, limit).await? {
                println!(
                    "Fetched {} pages ({} ok, {} errors) in {:.1}s",
                    s.total,
                    s.ok,
                    s.errors,
                    t_crawl.elapsed().as_secs_f64()
                );
            }

            let t_extract = Instant::now();
            let counts = extract(&conn, &config, None)?;
            println!("Extracted in {:.1}s", t_extract.elapsed().as_secs_f64());
            counts.print();

            merge_outputs(&conn, &out, &title)
        }
        Commands::Stats => {
            let s = db::get_stats(&conn)?;
            println!("Endpoints: {}", s.total);
            println!("Visited:   {}", s.visited);
            println!("Unvisited: {}", s.unvisited);
            println!("Fetched:   {}", s.fetched);
            println!("Errors:    {}", s.errors);
            println!("Complete:  {}", s.complete);
            println!("Partial:   {}", s.partial);
            println!("Failed:    {}", s.failed);
            Ok(())
        }
        Commands::Report { status, limit } => {
            let status = match status.as_deref() {
                Some(s) => match ExtractStatus::parse(&s.to_lowercase()) {
                    Some(st) => Some(st),
                    None => bail!("Unknown status {:?} (complete, partial, failed)", s),
                },
                None => None,
            };
            let rows = db::fetch_report(&conn, status, limit)?;
            if rows.is_empty() {
                println!("No extractions found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<32} | {:<8} | {:>7} | {:>8} | {:>5} | {:<40}",
                "#", "Endpoint", "Status", "Primary", "Fallback", "Diags", "First diagnostic"
            );
            println!("{}", "-".repeat(120));
            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<32} | {:<8} | {:>7} | {:>8} | {:>5} | {:<40}",
                    i + 1,
                    truncate(&r.endpoint_id, 32),
                    r.status,
                    r.primary,
                    r.fallback,
                    r.diagnostics,
                    truncate(r.first_diagnostic.as_deref().unwrap_or("-"), 40)
                );
            }
            let total: usize = rows.iter().map(|r| r.total).sum();
            println!("\n{} endpoints | {} elements recovered", rows.len(), total);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn crawl(
    conn: &Connection,
    config: &Config,
    limit: Option<usize>,
) -> Result<Option<crawler::CrawlStats>> {
    let targets = db::fetch_unvisited(conn, limit)?;
    if targets.is_empty() {
        println!("No unvisited endpoints. Run 'init' first or all pages are fetched.");
        return Ok(None);
    }
    println!("Fetching {} pages (streaming to DB)...", targets.len());

    let fetcher = Arc::new(crawler::HttpFetcher::new(config.fetch_context())?);
    let mut writer = db::PageWriter::new(conn)?;
    let stats = crawler::crawl_streaming(fetcher, targets, &config.crawl(), |outcome| {
        writer.save(&pipeline::page_row(&outcome))
    })
    .await?;
    Ok(Some(stats))
}

#[derive(Default)]
struct ExtractCounts {
    complete: usize,
    partial: usize,
    failed: usize,
    diagnostics: usize,
}

impl ExtractCounts {
    fn print(&self) {
        println!(
            "Saved {} complete, {} partial, {} failed ({} diagnostics).",
            self.complete, self.partial, self.failed, self.diagnostics,
        );
    }
}

fn extract(conn: &Connection, config: &Config, limit: Option<usize>) -> Result<ExtractCounts> {
    use indicatif::{ProgressBar, ProgressStyle};

    let pages = db::fetch_unextracted(conn, limit)?;
    let mut counts = ExtractCounts::default();
    if pages.is_empty() {
        println!("No pending pages. Run 'crawl' first.");
        return Ok(counts);
    }
    println!("Extracting {} pages...", pages.len());

    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let extract_config = config.extract();
    for chunk in pages.chunks(500) {
        let results = pipeline::extract_stored(chunk, &extract_config);
        for (_, r) in &results {
            match r.status {
                ExtractStatus::Complete => counts.complete += 1,
                ExtractStatus::Partial => counts.partial += 1,
                ExtractStatus::Failed => counts.failed += 1,
            }
            counts.diagnostics += r.diagnostics.len();
        }
        db::save_extractions(conn, &results)?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    Ok(counts)
}

fn merge_outputs(conn: &Connection, out: &std::path::Path, title: &str) -> Result<()> {
    let results = db::load_results(conn)?;
    if results.is_empty() {
        println!("Nothing to merge. Run 'extract' first.");
        return Ok(());
    }
    let (doc, report) = merge::merge(results);
    let (api_path, report_path) = pipeline::write_outputs(&doc, &report, out, title)?;
    println!(
        "Merged {} endpoints ({} failed left out), {} shared components.",
        doc.endpoints.len(),
        report.count(ExtractStatus::Failed),
        doc.shared_components.len()
    );
    println!("Wrote {} and {}", api_path.display(), report_path.display());
    Ok(())
}

async fn probe(config: &Config, urls: Vec<String>, out: &std::path::Path, title: &str) -> Result<()> {
    let mut targets = Vec::new();
    for url in urls {
        match sitemap::endpoint_id_from_url(&url) {
            Some(endpoint_id) => targets.push(crawler::CrawlTarget {
                row_id: None,
                endpoint_id,
                url,
            }),
            None => bail!("Cannot derive an endpoint id from {}", url),
        }
    }

    let fetcher = Arc::new(crawler::HttpFetcher::new(config.fetch_context())?);
    let (doc, report) =
        pipeline::run_in_memory(fetcher, targets, &config.crawl(), &config.extract()).await?;
    for e in &report.endpoints {
        println!(
            "{:<32} {:<8} {:>3} elements, {} diagnostics",
            truncate(&e.endpoint_id, 32),
            e.status.as_str(),
            e.counts.total,
            e.diagnostics.len()
        );
    }
    let (api_path, report_path) = pipeline::write_outputs(&doc, &report, out, title)?;
    println!("Wrote {} and {}", api_path.display(), report_path.display());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
