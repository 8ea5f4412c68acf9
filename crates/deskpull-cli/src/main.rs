mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use deskpull_client::{OAuthTokenProvider, ReqwestTransport};
use deskpull_core::pull::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY};
use deskpull_core::rate_limit::DEFAULT_CREDIT_BUFFER;
use deskpull_core::{
    FileSink, PullOptions, PullService, RateLimitConfig, TimeWindow, TracingPullReporter,
};

use crate::config::DeskConfig;

type DeskService = PullService<ReqwestTransport, OAuthTokenProvider>;

#[derive(Parser)]
#[command(name = "deskpull", version, about = "Export help-desk tickets with their threads")]
struct Cli {
    /// Directory holding .env, zoho-desk.json and the token cache
    /// (defaults to ~/.config/e2e/agent-profiles)
    #[arg(long, global = true, env = "DESKPULL_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one page of tickets
    Tickets {
        /// Page size
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Offset of the first ticket
        #[arg(long, default_value_t = 0)]
        from: usize,

        /// Status filter (e.g. open, closed, all)
        #[arg(long)]
        status: Option<String>,
    },

    /// Print one ticket with all its threads
    Get {
        /// Ticket id
        ticket_id: String,
    },

    /// Export tickets with their threads, one file per ticket
    Pull {
        /// Output root directory
        #[arg(short, long, default_value = "./zoho-desk-export")]
        output: PathBuf,

        /// Stop after this many tickets
        #[arg(long)]
        limit: Option<usize>,

        /// Only tickets active at or after this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        since: Option<DateTime<Utc>>,

        /// Only tickets active at or before this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        until: Option<DateTime<Utc>>,

        /// Parallel API calls (capped at 25)
        #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Delay before every API call, in milliseconds
        #[arg(long, default_value_t = 0)]
        min_delay_ms: u64,

        /// Pause once remaining API credits drop below this value
        #[arg(long, default_value_t = DEFAULT_CREDIT_BUFFER)]
        credit_buffer: i64,

        /// Status filter (e.g. open, closed, all)
        #[arg(long)]
        status: Option<String>,
    },

    /// Print the total number of tickets
    Count,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("deskpull=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .or_else(config::default_config_dir)
        .context("Could not locate a home directory. Pass --config-dir.")?;
    let config = DeskConfig::load(&config_dir)?;
    tracing::debug!(
        base_url = %config.base_url,
        department_id = ?config.department_id,
        "Loaded configuration from {}",
        config_dir.display()
    );
    let service = connect(&config)?;

    match cli.command {
        Commands::Tickets {
            limit,
            from,
            status,
        } => cmd_tickets(&service, from, limit, status.as_deref()).await?,
        Commands::Get { ticket_id } => cmd_get(&service, &ticket_id).await?,
        Commands::Pull {
            output,
            limit,
            since,
            until,
            concurrency,
            min_delay_ms,
            credit_buffer,
            status,
        } => {
            if concurrency > MAX_CONCURRENCY {
                tracing::warn!(
                    requested = concurrency,
                    max = MAX_CONCURRENCY,
                    "Concurrency capped"
                );
            }
            let options = PullOptions {
                window: TimeWindow { since, until },
                limit,
                concurrency,
                rate: RateLimitConfig::new(credit_buffer)
                    .with_min_delay(Duration::from_millis(min_delay_ms)),
                status,
                ..PullOptions::default()
            };
            cmd_pull(&service, &options, output).await?;
        }
        Commands::Count => cmd_count(&service).await?,
    }

    Ok(())
}

/// Build the API service from the loaded configuration.
fn connect(config: &DeskConfig) -> Result<DeskService> {
    let transport =
        ReqwestTransport::new(&config.org_id).context("Failed to create HTTP client")?;
    let tokens = OAuthTokenProvider::new(config.credentials.clone(), &config.accounts_url)
        .context("Failed to create token client")?
        .with_cache_file(&config.token_cache);
    Ok(PullService::new(transport, tokens, &config.base_url))
}

/// Accept RFC 3339 timestamps or bare dates (UTC midnight).
fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|_| format!("'{value}' is neither an RFC 3339 timestamp nor a YYYY-MM-DD date"))
}

async fn cmd_tickets(
    service: &DeskService,
    from: usize,
    limit: usize,
    status: Option<&str>,
) -> Result<()> {
    let tickets = service
        .list_page(from, limit, status)
        .await
        .context("Failed to list tickets")?;
    let count = tickets.len();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "tickets": tickets, "count": count }))?
    );
    Ok(())
}

async fn cmd_get(service: &DeskService, ticket_id: &str) -> Result<()> {
    let ticket = service
        .ticket(ticket_id)
        .await
        .with_context(|| format!("Failed to fetch ticket {ticket_id}"))?;
    println!("{}", serde_json::to_string_pretty(&ticket)?);
    Ok(())
}

async fn cmd_count(service: &DeskService) -> Result<()> {
    let total = service.count(None).await.context("Failed to count tickets")?;
    println!("{}", serde_json::to_string_pretty(&json!({ "total": total }))?);
    Ok(())
}

async fn cmd_pull(service: &DeskService, options: &PullOptions, output: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create output directory {}", output.display()))?;

    let sink = FileSink::new(&output);
    let result = service
        .pull(options, &sink, &TracingPullReporter)
        .await
        .context("Pull aborted")?;

    tracing::info!(
        "Wrote {} ticket files to {}/",
        result.written,
        output.display()
    );
    if result.write_failures > 0 {
        tracing::warn!(failures = result.write_failures, "Some tickets could not be written");
    }
    Ok(())
}
