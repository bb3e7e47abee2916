use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use edt_core::{IdentityMode, TutorProfile};
use edt_fetch::{FixtureSource, HttpFetcher, HttpScheduleSource, ScheduleSource};
use edt_store::{MemoryStore, PgStore, ScheduleStore};
use edt_sync::{
    maybe_build_scheduler, parse_departments, parse_weeks, DepartmentRegistry, SyncConfig,
    SyncOptions, SyncPipeline, SyncRunSummary, TutorDirectory,
};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

const MAX_DB_CONNECTIONS: u32 = 5;

#[derive(Debug, Parser)]
#[command(name = "edt-cli")]
#[command(about = "flOpEDT timetable sync command-line interface")]
struct Cli {
    /// Log at debug level instead of RUST_LOG / info.
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Mirror the selected departments and weeks into the database.
    Sync(SyncArgs),
    /// Apply the schema and register the known departments.
    Migrate,
    /// Run full syncs on EDT_SYNC_CRON until interrupted.
    Schedule(SourceArgs),
    /// Print a department's tutor listing as JSON.
    Tutors(TutorsArgs),
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Site root of the flOpEDT instance; overrides EDT_SOURCE_BASE.
    #[arg(long)]
    base: Option<String>,
    /// Read upstream listings from a fixture directory instead of HTTP.
    #[arg(long)]
    fixtures: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Comma-separated department codes; overrides EDT_DEPTS.
    #[arg(long)]
    depts: Option<String>,
    /// Sync weeks of this year (all of them unless `--weeks` is given)
    /// instead of the rolling window.
    #[arg(long)]
    year: Option<i32>,
    /// `10`, `1-4,10,12-13`, ... of `--year`, or of the current year.
    #[arg(long)]
    weeks: Option<String>,
    /// Sync N ISO weeks starting at the current one; overrides
    /// EDT_UPCOMING_WEEKS.
    #[arg(
        long,
        conflicts_with_all = ["year", "weeks"],
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    upcoming: Option<u32>,
    /// Replace each non-empty slice wholesale instead of diffing it.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    clean: bool,
    /// Write to an in-memory store and discard it.
    #[arg(long)]
    dry_run: bool,
    #[arg(long, default_value_t = IdentityMode::Deterministic)]
    identity: IdentityMode,
    /// Overwrite stored module colors with the fetched ones.
    #[arg(long)]
    refresh_colors: bool,
}

#[derive(Debug, Args)]
struct TutorsArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long)]
    dept: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    let config = SyncConfig::from_env();

    match cli.command {
        Commands::Sync(args) => {
            let summary = sync(&config, args).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.has_failures() {
                bail!(
                    "sync failed for department(s): {}",
                    summary.failed_departments().join(", ")
                );
            }
        }
        Commands::Migrate => migrate(&config).await?,
        Commands::Schedule(source) => {
            let registry = load_registry(&config).await?;
            let store = connect(&config).await?;
            match &source.fixtures {
                Some(dir) => {
                    let source = Arc::new(FixtureSource::new(dir));
                    schedule(source, store, registry, &config).await?
                }
                None => {
                    let source = Arc::new(http_source(&config, &source)?);
                    schedule(source, store, registry, &config).await?
                }
            }
        }
        Commands::Tutors(args) => {
            let dept = args.dept.trim().to_ascii_uppercase();
            let tutors = match &args.source.fixtures {
                Some(dir) => {
                    list_tutors(Arc::new(FixtureSource::new(dir)), &config, &dept).await?
                }
                None => {
                    let source = Arc::new(http_source(&config, &args.source)?);
                    list_tutors(source, &config, &dept).await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&tutors)?);
        }
    }

    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn http_source(config: &SyncConfig, args: &SourceArgs) -> Result<HttpScheduleSource> {
    let http = HttpFetcher::new(config.http_config())?;
    let base = args.base.as_deref().unwrap_or(&config.source_base);
    Ok(HttpScheduleSource::new(http, base))
}

async fn load_registry(config: &SyncConfig) -> Result<DepartmentRegistry> {
    DepartmentRegistry::load_or_builtin(&config.registry_path, &config.departments)
        .await
        .context("loading department registry")
}

async fn connect(config: &SyncConfig) -> Result<PgStore> {
    PgStore::connect(&config.database_url, MAX_DB_CONNECTIONS)
        .await
        .context("connecting to database")
}

fn sync_options(config: &SyncConfig, args: &SyncArgs) -> Result<SyncOptions> {
    let mut options = SyncOptions::from_config(config);
    if let Some(depts) = &args.depts {
        options.departments = parse_departments(depts);
    }
    if let Some(count) = args.upcoming {
        options.upcoming = Some(count);
    } else if args.year.is_some() || args.weeks.is_some() {
        options.upcoming = None;
        options.year = args.year;
        if let Some(weeks) = &args.weeks {
            options.weeks = parse_weeks(weeks)?;
        }
    }
    options.clean = args.clean;
    options.identity = args.identity;
    options.refresh_colors = args.refresh_colors;
    Ok(options)
}

async fn sync(config: &SyncConfig, args: SyncArgs) -> Result<SyncRunSummary> {
    let options = sync_options(config, &args)?;
    let registry = load_registry(config).await?;

    if args.dry_run {
        let mut codes = registry.codes();
        codes.extend(options.departments.iter().cloned());
        info!(departments = ?options.departments, "dry run; using in-memory store");
        let store = MemoryStore::with_departments(codes).await;
        run_with_store(config, &args.source, store, registry, &options).await
    } else {
        let store = connect(config).await?;
        run_with_store(config, &args.source, store, registry, &options).await
    }
}

async fn run_with_store<St>(
    config: &SyncConfig,
    source: &SourceArgs,
    store: St,
    registry: DepartmentRegistry,
    options: &SyncOptions,
) -> Result<SyncRunSummary>
where
    St: ScheduleStore + 'static,
{
    let summary = match &source.fixtures {
        Some(dir) => {
            let source = Arc::new(FixtureSource::new(dir));
            SyncPipeline::new(source, store, registry).run_once(options).await
        }
        None => {
            let source = Arc::new(http_source(config, source)?);
            SyncPipeline::new(source, store, registry).run_once(options).await
        }
    };
    Ok(summary)
}

async fn migrate(config: &SyncConfig) -> Result<()> {
    let store = connect(config).await?;
    store.migrate().await.context("applying migrations")?;

    let mut codes = load_registry(config).await?.codes();
    codes.extend(config.departments.iter().cloned());
    codes.sort();
    codes.dedup();
    let inserted = store
        .seed_departments(&codes)
        .await
        .context("registering departments")?;
    info!(inserted, departments = ?codes, "schema up to date");
    Ok(())
}

async fn schedule<S>(
    source: Arc<S>,
    store: PgStore,
    registry: DepartmentRegistry,
    config: &SyncConfig,
) -> Result<()>
where
    S: ScheduleSource + 'static,
{
    let pipeline = Arc::new(SyncPipeline::new(source, store, registry));
    let options = SyncOptions::from_config(config);
    let Some(mut sched) = maybe_build_scheduler(pipeline, config, options).await? else {
        warn!("scheduler disabled; set EDT_SCHEDULER_ENABLED=1 to enable it");
        return Ok(());
    };

    sched.start().await.context("starting scheduler")?;
    info!(cron = %config.sync_cron, "scheduler running; ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}

async fn list_tutors<S>(
    source: Arc<S>,
    config: &SyncConfig,
    dept: &str,
) -> Result<Vec<TutorProfile>>
where
    S: ScheduleSource + 'static,
{
    let directory = TutorDirectory::new(source, config.tutor_cache_ttl());
    let lookup = directory
        .tutors(dept)
        .await
        .with_context(|| format!("fetching tutors of {dept}"))?;
    Ok(lookup.value)
}
