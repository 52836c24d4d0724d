use crate::{
    polite_delay, sanitize_filename, EngineConfig, FetchEngine, FetchError, PolicyStore,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pagefetch")]
#[command(about = "Adaptive page fetcher for anti-bot-protected sites")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Engine configuration file (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Per-domain policy table (JSON)")]
    pub policies: Option<PathBuf>,

    #[arg(long, help = "Global per-attempt timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Plain-transport retry ceiling")]
    pub retries: Option<usize>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch a single URL and print or save the body
    Fetch {
        #[arg(short, long, help = "URL to fetch")]
        url: String,

        #[arg(short, long, help = "Output file (stdout when omitted)")]
        output: Option<PathBuf>,

        #[arg(long = "param", help = "Query parameter as key=value (repeatable)")]
        params: Vec<String>,
    },

    /// Fetch URLs from a file, one per line, with polite pacing
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(short, long, help = "Output directory for fetched bodies")]
        output: PathBuf,

        #[arg(long, help = "Stop after this many URLs")]
        max_urls: Option<usize>,

        #[arg(long, help = "Warm-up URL fetched first, failures ignored")]
        warm_up: Option<String>,
    },

    /// Parse and validate configuration files
    Validate {
        #[arg(long, help = "Engine configuration file to validate")]
        config: Option<PathBuf>,

        #[arg(long, help = "Policy table file to validate")]
        policies: Option<PathBuf>,
    },
}

/// Summary of one batch run, printed at the end and logged.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_requested: usize,
    pub pages_ok: usize,
    pub errors: usize,
    pub escalated_domains: Vec<String>,
    pub duration_s: f64,
}

impl RunStats {
    fn new(pages_requested: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            pages_requested,
            pages_ok: 0,
            errors: 0,
            escalated_domains: Vec::new(),
            duration_s: 0.0,
        }
    }
}

pub struct CliRunner {
    pub config: EngineConfig,
    pub engine: Arc<FetchEngine>,
}

impl CliRunner {
    pub fn new(config: EngineConfig, policies: PolicyStore) -> anyhow::Result<Self> {
        let engine = Arc::new(FetchEngine::new(config.clone(), policies)?);
        Ok(Self { config, engine })
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Fetch {
                url,
                output,
                params,
            } => self.run_fetch(url, output, params).await,
            Commands::Batch {
                input,
                output,
                max_urls,
                warm_up,
            } => self.run_batch(input, output, max_urls, warm_up).await,
            Commands::Validate { config, policies } => self.run_validate(config, policies).await,
        }
    }

    async fn run_fetch(
        &self,
        url: String,
        output: Option<PathBuf>,
        params: Vec<String>,
    ) -> anyhow::Result<()> {
        let params = parse_params(&params)?;
        let params_ref = (!params.is_empty()).then_some(params.as_slice());

        let result = self.engine.get_with_params(&url, params_ref).await?;

        info!(
            url = result.url.as_str(),
            status = result.status_code,
            elapsed_ms = result.elapsed_ms,
            bytes = result.body_text.len(),
            "fetch complete"
        );

        match output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&path, &result.body_text).await?;
                println!("Fetched {} -> {}", result.url, path.display());
                println!("  status:     {}", result.status_code);
                println!("  elapsed:    {}ms", result.elapsed_ms);
                println!("  body bytes: {}", result.body_text.len());
            }
            None => {
                print!("{}", result.body_text);
            }
        }

        Ok(())
    }

    async fn run_batch(
        &self,
        input: PathBuf,
        output: PathBuf,
        max_urls: Option<usize>,
        warm_up: Option<String>,
    ) -> anyhow::Result<()> {
        let urls = self.read_urls_from_file(&input).await?;
        let urls: Vec<String> = match max_urls {
            Some(limit) => urls.into_iter().take(limit).collect(),
            None => urls,
        };
        info!("loaded {} URLs from {}", urls.len(), input.display());

        fs::create_dir_all(&output).await?;

        // Some sites refuse detail pages from sessions that never saw the
        // landing page; a warm-up request seeds cookies for the run.
        if let Some(warm_url) = warm_up {
            if let Err(e) = self.engine.get(&warm_url).await {
                warn!("warm-up fetch failed (continuing): {e}");
            }
        }

        let mut stats = RunStats::new(urls.len());
        info!("--- starting fetch run [{}] ---", stats.run_id);
        let started = std::time::Instant::now();

        for (i, url) in urls.iter().enumerate() {
            if i > 0 {
                // Polite pacing between fetches, outside the engine.
                tokio::time::sleep(polite_delay(
                    self.config.min_delay_s,
                    self.config.max_delay_s,
                ))
                .await;
            }

            match self.engine.get(url).await {
                Ok(result) => {
                    if (200..300).contains(&result.status_code) {
                        stats.pages_ok += 1;
                    } else {
                        stats.errors += 1;
                        warn!(url = url.as_str(), status = result.status_code, "non-success status");
                    }

                    let filename = format!("{}.html", sanitize_filename(url));
                    let path = output.join(filename);
                    fs::write(&path, &result.body_text).await?;

                    if (i + 1) % 5 == 0 {
                        info!("fetched {}/{} pages", i + 1, urls.len());
                    }
                }
                Err(e) => {
                    stats.errors += 1;
                    warn!(url = url.as_str(), "fetch failed: {e}");
                }
            }
        }

        stats.duration_s = started.elapsed().as_secs_f64();
        stats.finished_at = Some(Utc::now());
        stats.escalated_domains = self.engine.escalated_domains();

        print_summary(&stats);
        Ok(())
    }

    async fn run_validate(
        &self,
        config: Option<PathBuf>,
        policies: Option<PathBuf>,
    ) -> anyhow::Result<()> {
        if let Some(path) = config {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let parsed: EngineConfig = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            parsed.validate()?;
            println!(
                "config ok: timeout={:?} retries={} backoff_base={}s",
                parsed.timeout, parsed.max_retries, parsed.backoff_base_s
            );
        }

        if let Some(path) = policies {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let parsed: PolicyStore = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            println!(
                "policies ok: {} explicit domains + default ({:?})",
                parsed.len(),
                parsed.fallback().strategy
            );
        }

        Ok(())
    }

    async fn read_urls_from_file(&self, path: &PathBuf) -> anyhow::Result<Vec<String>> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(String::from)
            .collect())
    }
}

fn parse_params(raw: &[String]) -> Result<Vec<(String, String)>, FetchError> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| {
                    FetchError::Config(format!("query parameter '{pair}' is not key=value"))
                })
        })
        .collect()
}

fn print_summary(stats: &RunStats) {
    println!("\n=== RUN SUMMARY ===");
    println!("run_id:          {}", stats.run_id);
    println!("pages_ok:        {}/{}", stats.pages_ok, stats.pages_requested);
    println!("errors:          {}", stats.errors);
    println!("escalated:       {}", stats.escalated_domains.join(", "));
    println!("duration_s:      {:.2}", stats.duration_s);
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let raw = vec!["pag=2".to_string(), "sort=price=asc".to_string()];
        let parsed = parse_params(&raw).unwrap();
        assert_eq!(parsed[0], ("pag".to_string(), "2".to_string()));
        // split_once keeps everything after the first '='
        assert_eq!(parsed[1], ("sort".to_string(), "price=asc".to_string()));

        assert!(parse_params(&["broken".to_string()]).is_err());
    }

    #[test]
    fn test_run_stats_start_empty() {
        let stats = RunStats::new(10);
        assert!(!stats.run_id.is_empty());
        assert_eq!(stats.pages_requested, 10);
        assert_eq!(stats.pages_ok, 0);
        assert_eq!(stats.errors, 0);
        assert!(stats.finished_at.is_none());
    }
}
