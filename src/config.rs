use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;

use crate::crawler::{
    CrawlConfig, FetchContext, DEFAULT_BASE_BACKOFF_MS, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES,
    DEFAULT_PAGE_TIMEOUT_SECS,
};
use crate::db::DEFAULT_DB_PATH;
use crate::parser::{ExtractConfig, DEFAULT_MIN_ELEMENTS};

/// Session cookie for docs behind a login. Never accepted on the command line.
pub const COOKIE_ENV: &str = "DOCSCHEMA_COOKIE";

/// Options shared by every command. Each can also come from the environment.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DOCSCHEMA_DB", default_value = DEFAULT_DB_PATH, global = true)]
    pub db: PathBuf,

    /// Base URL that relative endpoint URLs are joined onto
    #[arg(long, env = "DOCSCHEMA_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Concurrent page fetches
    #[arg(long, env = "DOCSCHEMA_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY, global = true)]
    pub concurrency: usize,

    /// Retries for transient fetch failures
    #[arg(long, env = "DOCSCHEMA_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES, global = true)]
    pub max_retries: u32,

    /// Base backoff between retries, doubled on every attempt
    #[arg(long, env = "DOCSCHEMA_BACKOFF_MS", default_value_t = DEFAULT_BASE_BACKOFF_MS, global = true)]
    pub backoff_ms: u64,

    /// Per-page time limit covering all retries
    #[arg(long, env = "DOCSCHEMA_PAGE_TIMEOUT", default_value_t = DEFAULT_PAGE_TIMEOUT_SECS, global = true)]
    pub page_timeout: u64,

    /// Elements the primary pass must find before the fallback pass is skipped
    #[arg(long, env = "DOCSCHEMA_MIN_ELEMENTS", default_value_t = DEFAULT_MIN_ELEMENTS, global = true)]
    pub min_elements: usize,

    /// User-Agent header for page requests
    #[arg(long, env = "DOCSCHEMA_USER_AGENT", global = true)]
    pub user_agent: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("--concurrency must be at least 1");
        }
        if self.min_elements == 0 {
            bail!("--min-elements must be at least 1");
        }
        if self.page_timeout == 0 {
            bail!("--page-timeout must be at least 1 second");
        }
        if let Some(base) = &self.base_url {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                bail!("--base-url must be an http(s) URL, got {}", base);
            }
        }
        Ok(())
    }

    pub fn crawl(&self) -> CrawlConfig {
        CrawlConfig {
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.backoff_ms),
            page_timeout: Duration::from_secs(self.page_timeout),
        }
    }

    pub fn extract(&self) -> ExtractConfig {
        ExtractConfig {
            min_elements: self.min_elements,
        }
    }

    pub fn fetch_context(&self) -> FetchContext {
        let mut ctx = FetchContext {
            base_url: self.base_url.clone(),
            cookie: std::env::var(COOKIE_ENV).ok().filter(|c| !c.is_empty()),
            ..FetchContext::default()
        };
        if let Some(ua) = &self.user_agent {
            ctx.user_agent = ua.clone();
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: Config,
    }

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["docschema"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv).config
    }

    #[test]
    fn defaults_are_valid() {
        let c = parse(&["--db", "x.sqlite"]);
        c.validate().unwrap();
        assert_eq!(c.crawl().concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(c.extract().min_elements, DEFAULT_MIN_ELEMENTS);
    }

    #[test]
    fn zero_concurrency_and_threshold_are_rejected() {
        assert!(parse(&["--concurrency", "0"]).validate().is_err());
        assert!(parse(&["--min-elements", "0"]).validate().is_err());
        assert!(parse(&["--base-url", "docs.example.com"]).validate().is_err());
    }

    #[test]
    fn durations_and_user_agent() {
        let c = parse(&["--backoff-ms", "250", "--page-timeout", "7", "--user-agent", "probe/1"]);
        let crawl = c.crawl();
        assert_eq!(crawl.base_backoff, Duration::from_millis(250));
        assert_eq!(crawl.page_timeout, Duration::from_secs(7));
        assert_eq!(c.fetch_context().user_agent, "probe/1");
    }
}
