use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{COOKIE, USER_AGENT};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::FetchError;

pub const DEFAULT_CONCURRENCY: usize = 6;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 2000;
pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 90;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// One documentation page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    /// Row id in `endpoints`, when the target came from the database.
    pub row_id: Option<i64>,
    pub endpoint_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

/// Retrieves raw page markup. Implementations must not share mutable state
/// between calls.
pub trait PageFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedPage, FetchError>> + Send;
}

// ── HTTP fetcher ──

/// Read-only request settings shared by every worker.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub base_url: Option<String>,
    pub cookie: Option<String>,
    pub user_agent: String,
}

impl Default for FetchContext {
    fn default() -> Self {
        Self {
            base_url: None,
            cookie: None,
            user_agent: concat!("docschema/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchContext {
    /// Absolute URL for `url`, joining relative paths onto the base URL.
    pub fn resolve(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if url.starts_with('/') => {
                format!("{}{}", base.trim_end_matches('/'), url)
            }
            _ => url.to_string(),
        }
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    ctx: FetchContext,
}

impl HttpFetcher {
    pub fn new(ctx: FetchContext) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, ctx })
    }
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut req = self
            .client
            .get(self.ctx.resolve(url))
            .header(USER_AGENT, &self.ctx.user_agent);
        if let Some(cookie) = &self.ctx.cookie {
            req = req.header(COOKIE, cookie);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        Ok(FetchedPage { status, body })
    }
}

// ── Coordinator ──

#[derive(Debug, Clone, Copy)]
pub struct CrawlConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub page_timeout: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            page_timeout: Duration::from_secs(DEFAULT_PAGE_TIMEOUT_SECS),
        }
    }
}

/// Result of one target's fetch cycle.
#[derive(Debug)]
pub struct PageOutcome {
    pub target: CrawlTarget,
    pub result: Result<FetchedPage, FetchError>,
    pub attempts: u32,
    pub latency_ms: i64,
}

pub struct CrawlStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// Fetch targets concurrently and hand each outcome to `sink` as it arrives.
pub async fn crawl_streaming<F, S>(
    fetcher: Arc<F>,
    targets: Vec<CrawlTarget>,
    config: &CrawlConfig,
    mut sink: S,
) -> Result<CrawlStats>
where
    F: PageFetcher,
    S: FnMut(PageOutcome) -> Result<()>,
{
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let total = targets.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<PageOutcome>(config.concurrency.max(1) * 2);

    for target in targets {
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let config = *config;

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let start = Instant::now();
            let (result, attempts) =
                match tokio::time::timeout(config.page_timeout, fetch_with_retry(&*fetcher, &target, &config))
                    .await
                {
                    Ok(done) => done,
                    Err(_) => (
                        Err(FetchError::Timeout {
                            secs: config.page_timeout.as_secs(),
                        }),
                        0,
                    ),
                };
            if let Err(e) = &result {
                warn!("Fetch failed for {}: {}", target.endpoint_id, e);
            }
            let _ = tx
                .send(PageOutcome {
                    target,
                    result,
                    attempts,
                    latency_ms: start.elapsed().as_millis() as i64,
                })
                .await;
        });
    }

    // rx closes once every worker has dropped its sender
    drop(tx);

    let mut ok = 0usize;
    let mut errors = 0usize;
    while let Some(outcome) = rx.recv().await {
        if outcome.result.is_ok() {
            ok += 1;
        } else {
            errors += 1;
        }
        sink(outcome)?;
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Fetched {} pages ({} ok, {} errors)", total, ok, errors);

    Ok(CrawlStats { total, ok, errors })
}

/// Returns the final result and the number of attempts made.
async fn fetch_with_retry<F: PageFetcher>(
    fetcher: &F,
    target: &CrawlTarget,
    config: &CrawlConfig,
) -> (Result<FetchedPage, FetchError>, u32) {
    let mut attempt = 0u32;
    loop {
        let err = match fetcher.fetch(&target.url).await {
            Ok(page) => match FetchError::from_status(page.status) {
                None => return (Ok(page), attempt + 1),
                Some(e) => e,
            },
            Err(e) => e,
        };

        if !err.is_transient() {
            return (Err(err), attempt + 1);
        }
        if attempt >= config.max_retries {
            return (
                Err(FetchError::Exhausted {
                    attempts: attempt + 1,
                    last: err.to_string(),
                }),
                attempt + 1,
            );
        }

        let backoff = config.base_backoff.saturating_mul(2u32.saturating_pow(attempt));
        warn!(
            "{} on {} (attempt {}/{}), backing off {:.1}s",
            err,
            target.endpoint_id,
            attempt + 1,
            config.max_retries + 1,
            backoff.as_secs_f64()
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}
