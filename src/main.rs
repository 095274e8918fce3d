use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use exam_score_analytics::cache::{CacheAside, CacheBackend, MemoryBackend, RedisBackend};
use exam_score_analytics::config::Config;
use exam_score_analytics::db::{self, PgRecordStore};
use exam_score_analytics::models::{Category, Metadata, RankingEntry, ScoreRecord, Subject};
use exam_score_analytics::ranking::DEFAULT_PAGE_SIZE;
use exam_score_analytics::{report, AnalyticsService, InvalidationScope};

#[derive(Parser)]
#[command(name = "exam-score-analytics")]
#[command(about = "Exam score statistics and per-category rankings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Bulk load score records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Import even if the store already holds records
        #[arg(long)]
        force: bool,
    },
    /// Level distribution per subject
    Stats {
        #[arg(long, value_delimiter = ',', default_value = "all")]
        subjects: Vec<String>,
        #[arg(long, value_delimiter = ',', default_value = "all")]
        levels: Vec<String>,
    },
    /// Top students of one category
    Top {
        #[arg(long)]
        category: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        min_total: Option<f64>,
    },
    /// Paged listing of one category
    Page {
        #[arg(long)]
        category: String,
        #[arg(long)]
        min_total: Option<f64>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        take: usize,
    },
    /// Top students of every category
    TopAll {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Score sheet of one student
    Student {
        #[arg(long)]
        id: String,
    },
    /// Categories in which a student ranks within the top ten
    Ranks {
        #[arg(long)]
        id: String,
    },
    /// List subjects, score levels and categories
    #[command(alias = "metadata")]
    Categories,
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Drop cached rankings for one category, or everything with "all"
    Invalidate {
        #[arg(long)]
        scope: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn build_cache(config: &Config) -> CacheAside {
    let backend: Arc<dyn CacheBackend> = match config.redis_url.as_deref() {
        Some(url) => match RedisBackend::new(url, config.cache.timeout) {
            Ok(backend) => Arc::new(backend),
            Err(err) => {
                warn!(error = %err, "invalid REDIS_URL, using in-process cache");
                Arc::new(MemoryBackend::new())
            }
        },
        None => Arc::new(MemoryBackend::new()),
    };
    CacheAside::new(
        backend,
        config.cache.namespace.clone(),
        config.cache.ttl_variance,
    )
}

/// How long background cache writes may take to land before exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn print_entry(entry: &RankingEntry) {
    println!(
        "{}. {} total {:.2}",
        entry.rank, entry.student_id, entry.total_score
    );
}

fn print_metadata(metadata: &Metadata) {
    println!("Subjects:");
    for subject in &metadata.subjects {
        println!("- {}: {}", subject.key, subject.name);
    }
    println!("Levels:");
    for level in &metadata.levels {
        println!("- {}: {}", level.key, level.label);
    }
    println!("Categories:");
    for category in &metadata.categories {
        let subjects: Vec<&str> = category.subjects.iter().map(|subject| subject.key()).collect();
        println!("- {} ({}): {}", category.category, category.name, subjects.join(", "));
    }
}

fn print_score_sheet(record: &ScoreRecord) {
    println!("Student {}", record.student_id);
    for subject in Subject::ALL {
        match record.score(subject) {
            Some(score) => println!("- {}: {:.2}", subject.display_name(), score),
            None => println!("- {}: -", subject.display_name()),
        }
    }
    if let Some(code) = &record.foreign_language_code {
        println!("Foreign language code: {code}");
    }
    for category in Category::ALL {
        if let Some(total) = record.category_total(category) {
            println!("{} total: {:.2}", category.display_name(), total);
        }
    }
    if let Some(average) = record.average() {
        println!("Average: {average:.2}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Categories = cli.command {
        print_metadata(&AnalyticsService::metadata());
        return Ok(());
    }

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let service = AnalyticsService::new(
        Arc::new(PgRecordStore::new(pool.clone())),
        build_cache(&config),
        config.cache.ttl,
    );

    let outcome = run(cli.command, &pool, &service).await;
    service.shutdown(SHUTDOWN_GRACE).await;
    outcome
}

async fn run(command: Commands, pool: &PgPool, service: &AnalyticsService) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv, force } => {
            let existing = db::count_records(pool).await?;
            if existing > 0 && !force {
                bail!("store already holds {existing} records; pass --force to import anyway");
            }
            let written = db::import_csv(pool, &csv).await?;
            service.invalidate(InvalidationScope::All).await;
            println!("Imported {written} score records from {}.", csv.display());
        }
        Commands::Stats { subjects, levels } => {
            let statistics = service.filter_statistics(&subjects, &levels).await?;
            for entry in statistics {
                let levels: Vec<String> = entry
                    .levels
                    .iter()
                    .map(|(level, count)| format!("{level} {count}"))
                    .collect();
                println!(
                    "- {} ({} scores): {}",
                    entry.subject.display_name(),
                    entry.total,
                    levels.join(", ")
                );
            }
        }
        Commands::Top {
            category,
            limit,
            min_total,
        } => {
            let category: Category = category.parse()?;
            let entries = service.category_ranking(category, limit, min_total).await?;

            if entries.is_empty() {
                println!("No qualifying students for {}.", category.display_name());
            } else {
                println!("Top students of {}:", category.display_name());
                entries.iter().for_each(print_entry);
            }
        }
        Commands::Page {
            category,
            min_total,
            skip,
            take,
        } => {
            let category: Category = category.parse()?;
            let page = service.category_page(category, min_total, skip, take).await?;
            println!(
                "{}: {} qualifying, showing {} from offset {}",
                category.display_name(),
                page.total,
                page.entries.len(),
                page.skip
            );
            page.entries.iter().for_each(print_entry);
        }
        Commands::TopAll { limit } => {
            for (category, entries) in service.all_categories_top(limit).await? {
                println!("{}:", category.display_name());
                entries.iter().for_each(print_entry);
            }
        }
        Commands::Student { id } => {
            let record = service.lookup_student(&id).await?;
            print_score_sheet(&record);
        }
        Commands::Ranks { id } => {
            let ranks = service.student_membership(&id).await?;
            if ranks.is_empty() {
                println!("Student {} is not in the top ten of any category.", id.trim());
            }
            for rank in ranks {
                println!(
                    "- {}: rank {} with {:.2}",
                    rank.category.display_name(),
                    rank.rank,
                    rank.total_score
                );
            }
        }
        Commands::Report { out, limit } => {
            let snapshot = service.statistics_snapshot().await?;
            let tops = service.all_categories_top(limit).await?;
            let report = report::build_report(chrono::Utc::now(), &snapshot, &tops);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Invalidate { scope } => {
            let scope: InvalidationScope = scope.parse()?;
            if service.invalidate(scope).await {
                println!("Cache invalidated.");
            } else {
                println!("Nothing to invalidate, or the cache is unreachable.");
            }
        }
        Commands::Categories => {}
    }

    Ok(())
}
