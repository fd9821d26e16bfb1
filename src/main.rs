mod careers;
mod config;
mod db;
mod delivery;
mod error;
mod extract;
mod fetch;
mod filter;
mod models;
mod notify;
mod retry;
mod runner;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use careers::CareerDirectory;
use config::Config;
use db::Database;
use delivery::{Dispatcher, WebhookSink};
use extract::Extractor;
use fetch::HttpFetcher;
use filter::RelevanceFilter;
use notify::{compensation_display, location_display};
use runner::{Orchestrator, PartitionReport, RunLock, RunSummary};

#[derive(Parser)]
#[command(name = "jobwatch")]
#[command(about = "Watch job search results and push new relevant listings to chat channels")]
struct Cli {
    /// Configuration file (defaults to ./jobwatch.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides the configured path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Search every partition once
    Run {
        /// Fetch and filter, but do not record or notify
        #[arg(long)]
        dry_run: bool,
    },

    /// Search a single partition
    Partition {
        /// Partition name, e.g. NYC
        name: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Parse a saved search-result page and show what would be kept
    Extract {
        /// HTML file
        file: PathBuf,

        /// Partition the page belongs to (defaults to the first configured)
        #[arg(short, long)]
        partition: Option<String>,
    },

    /// List recently seen listings
    List {
        /// Number of listings to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show store statistics
    Stats,

    /// Forget listings not seen for a number of days
    Prune {
        #[arg(short, long, default_value = "30")]
        days: i64,
    },

    /// Send a test message to a partition's channel
    TestNotify {
        /// Partition name (defaults to the default channel)
        #[arg(short, long)]
        partition: Option<String>,
    },
}

fn init_logging() {
    // stdout is reserved for command output
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init();
}

fn open_database(cli_path: Option<&Path>, config: &Config) -> Result<Database> {
    let path = cli_path.or(config.database_path.as_deref());
    Database::open(path).context("Failed to open database")
}

fn ensure_initialized(db: &Database) -> Result<()> {
    if !db.is_initialized()? {
        bail!("Database not initialized. Run 'jobwatch init' first.");
    }
    Ok(())
}

fn load_careers(config: &Config) -> Result<CareerDirectory> {
    match &config.careers_file {
        Some(path) => {
            let careers = CareerDirectory::load(path)?;
            if careers.is_empty() {
                warn!(path = %path.display(), "career directory has no entries");
            } else {
                info!(path = %path.display(), entries = careers.len(), "loaded career directory");
            }
            Ok(careers)
        }
        None => Ok(CareerDirectory::empty()),
    }
}

fn main() -> Result<()> {
    init_logging();
    execute(Cli::parse())
}

fn execute(cli: Cli) -> Result<()> {
    let config = Config::resolve(cli.config.as_deref())?;
    // only the commands that read or write the store create it
    let database = || open_database(cli.db.as_deref(), &config);

    match cli.command {
        Commands::Init => {
            let db = database()?;
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Run { dry_run } => {
            let db = database()?;
            ensure_initialized(&db)?;
            if !dry_run {
                config.ensure_deliverable()?;
            }
            let _lock = RunLock::acquire(&RunLock::path_for(db.path()), config.run.max_duration() * 2)?;

            let fetcher = HttpFetcher::new(&config.fetch)?;
            let sink = WebhookSink::new(&config.delivery)?;
            let orchestrator = Orchestrator::new(&config, &db, &fetcher, &sink, load_careers(&config)?)?
                .with_dry_run(dry_run);

            let summary = orchestrator.run();
            print_summary(&summary);

            if summary.attempted() > 0 && summary.succeeded() == 0 {
                bail!("every attempted partition failed");
            }
        }

        Commands::Partition { name, dry_run } => {
            let db = database()?;
            ensure_initialized(&db)?;
            if !dry_run {
                config.ensure_deliverable()?;
            }
            let _lock = RunLock::acquire(&RunLock::path_for(db.path()), config.run.max_duration() * 2)?;

            let fetcher = HttpFetcher::new(&config.fetch)?;
            let sink = WebhookSink::new(&config.delivery)?;
            let orchestrator = Orchestrator::new(&config, &db, &fetcher, &sink, load_careers(&config)?)?
                .with_dry_run(dry_run);

            let report = orchestrator.run_partition(&name)?;
            print_summary(&RunSummary {
                dry_run,
                partitions: vec![report],
            });
        }

        Commands::Extract { file, partition } => {
            let partition = match partition {
                Some(name) => config
                    .partition(&name)
                    .ok_or_else(|| anyhow!("Unknown partition '{}'", name))?,
                None => config
                    .partitions
                    .first()
                    .ok_or_else(|| anyhow!("No partitions configured"))?,
            };
            let document = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let extractor = Extractor::new(load_careers(&config)?)?;
            let relevance = RelevanceFilter::new(&config.filter)?;
            let extraction = extractor.extract(&document, partition);

            println!(
                "{} cards, {} parsed, {} malformed ({} career pages known)",
                extraction.cards_seen(),
                extraction.records.len(),
                extraction.failures,
                extractor.careers().len()
            );
            if extraction.records.is_empty() {
                return Ok(());
            }
            println!();
            println!("{:<22} {:<30} {:<20} {:<24} {:<20}", "DECISION", "TITLE", "ORGANIZATION", "LOCATION", "PAY");
            println!("{}", "-".repeat(120));
            for record in &extraction.records {
                let decision = match relevance.evaluate_for(partition, record) {
                    filter::Decision::Accept => "accept".to_string(),
                    filter::Decision::Reject(reason) => reason.to_string(),
                };
                println!(
                    "{:<22} {:<30} {:<20} {:<24} {:<20}",
                    decision,
                    truncate(&record.title, 28),
                    truncate(&record.organization, 18),
                    truncate(&location_display(record), 22),
                    truncate(&compensation_display(record), 20)
                );
            }
        }

        Commands::List { limit } => {
            let db = database()?;
            ensure_initialized(&db)?;
            let records = db.recent(limit)?;
            if records.is_empty() {
                println!("No listings seen yet.");
            } else {
                println!("{:<17} {:<8} {:<30} {:<20} {:<9}", "FIRST SEEN", "MARKET", "TITLE", "ORGANIZATION", "NOTIFIED");
                println!("{}", "-".repeat(88));
                for record in records {
                    println!(
                        "{:<17} {:<8} {:<30} {:<20} {:<9}",
                        record.first_seen.format("%Y-%m-%d %H:%M"),
                        truncate(record.partition.as_deref().unwrap_or("-"), 8),
                        truncate(record.title.as_deref().unwrap_or("-"), 28),
                        truncate(record.organization.as_deref().unwrap_or("-"), 18),
                        if record.notified { "yes" } else { "no" }
                    );
                }
            }
        }

        Commands::Stats => {
            let db = database()?;
            ensure_initialized(&db)?;
            let stats = db.stats(Utc::now())?;
            println!("Database: {}", db.path().display());
            println!("Listings seen:          {}", stats.total_seen);
            println!("First seen today:       {}", stats.seen_today);
            println!("Never notified:         {}", stats.unnotified);
            println!("Searches logged:        {}", stats.total_searches);
            println!("Failed searches today:  {}", stats.failed_searches_today);
        }

        Commands::Prune { days } => {
            let db = database()?;
            ensure_initialized(&db)?;
            if days < 1 {
                bail!("--days must be at least 1");
            }
            let removed = db.prune(Utc::now() - ChronoDuration::days(days))?;
            println!("Removed {} listing(s) not seen in {} days.", removed, days);
        }

        Commands::TestNotify { partition } => {
            let (name, channel) = match &partition {
                Some(name) => {
                    let partition = config
                        .partition(name)
                        .ok_or_else(|| anyhow!("Unknown partition '{}'", name))?;
                    (partition.name.as_str(), config.channel_for(partition))
                }
                None => ("default", None),
            };

            let sink = WebhookSink::new(&config.delivery)?;
            let dispatcher = Dispatcher::new(&sink, &config.delivery);
            let outcome = dispatcher.send(channel, &notify::test_message(name));
            if !outcome.is_delivered() {
                bail!("Test notification for {} failed: {:?}", name, outcome);
            }
            println!("Test notification for {} delivered ({:?}).", name, outcome);
        }
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if summary.dry_run {
        println!("Dry run: nothing was recorded or sent.");
    }
    println!(
        "{:<10} {:<10} {:>6} {:>6} {:>9} {:>5} {:>9} {:>6} {:>7}",
        "PARTITION", "STATUS", "FOUND", "BAD", "RELEVANT", "NEW", "NOTIFIED", "SENT", "FAILED"
    );
    println!("{}", "-".repeat(78));
    for report in &summary.partitions {
        print_report_row(report);
    }
    println!("{}", "-".repeat(78));
    println!(
        "{:<10} {:<10} {:>6} {:>6} {:>9} {:>5} {:>9} {:>6} {:>7}",
        "TOTAL",
        format!("{}/{} ok", summary.succeeded(), summary.partitions.len()),
        summary.records_found(),
        summary.parse_failures(),
        summary.relevant(),
        summary.records_new(),
        summary.notified(),
        summary.messages_sent(),
        summary.messages_failed()
    );

    for (partition, error) in summary.errors() {
        println!("  {}: {}", partition, error);
    }

    if summary.dry_run {
        for report in &summary.partitions {
            for record in &report.new_records {
                println!(
                    "  would notify [{}] {} at {} ({})",
                    report.partition,
                    record.title,
                    record.organization,
                    record.detail_url
                );
            }
        }
    }
}

fn print_report_row(report: &PartitionReport) {
    let status = match report.status {
        runner::PartitionStatus::Succeeded => "ok",
        runner::PartitionStatus::Failed => "failed",
        runner::PartitionStatus::Skipped => "skipped",
    };
    println!(
        "{:<10} {:<10} {:>6} {:>6} {:>9} {:>5} {:>9} {:>6} {:>7}",
        truncate(&report.partition, 10),
        status,
        report.records_found,
        report.parse_failures,
        report.relevant,
        report.new,
        report.notified,
        report.messages_sent,
        report.messages_failed
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Associate Product Manager", 12), "Associate...");
        assert_eq!(truncate("Zürich Büro Äpfel", 8), "Züric...");
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["jobwatch", "--db", "/tmp/x.db", "partition", "NYC", "--dry-run"]).unwrap();
        assert_eq!(cli.db.as_deref(), Some(Path::new("/tmp/x.db")));
        assert!(matches!(cli.command, Commands::Partition { ref name, dry_run: true } if name == "NYC"));

        let cli = Cli::try_parse_from(["jobwatch", "prune"]).unwrap();
        assert!(matches!(cli.command, Commands::Prune { days: 30 }));
    }

    #[test]
    fn test_extract_does_not_create_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let data_dir = tmp.path().join("data");
        let db_path = data_dir.join("jobwatch.db");
        let page = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/search_results.html");

        let cli = Cli::try_parse_from([
            "jobwatch",
            "--db",
            db_path.to_str().unwrap(),
            "extract",
            page,
        ])
        .unwrap();
        execute(cli).unwrap();
        assert!(!db_path.exists());
        assert!(!data_dir.exists());

        let cli = Cli::try_parse_from(["jobwatch", "--db", db_path.to_str().unwrap(), "init"]).unwrap();
        execute(cli).unwrap();
        assert!(db_path.exists());
    }
}
