use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use shelfscan_client::{
    HttpContextProvider, PlatformProfile, builtin_profiles, load_profiles, merge_profiles,
    registry_from_profiles,
};
use shelfscan_core::dispatch::CapabilityRegistry;
use shelfscan_core::job::{BatchSummary, SubmitOptions};
use shelfscan_core::query::{ProductQuery, SortKey, SortOrder};
use shelfscan_core::rate_limiter::RateLimitConfig;
use shelfscan_core::traits::{ContextProvider, ProductStore, RunArchive};
use shelfscan_core::util::{label_from_path, parse_locator_lines};
use shelfscan_core::{MemoryProductStore, Orchestrator, OrchestratorConfig, TracingProgressSink};
use shelfscan_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "shelfscan", version, about = "Batch product page collector")]
struct Cli {
    /// JSON file of platform profiles extending the built-in table
    #[arg(long, global = true, env = "SHELFSCAN_PROFILES")]
    profiles: Option<PathBuf>,

    /// Product file used when DATABASE_URL is not set
    #[arg(
        long,
        global = true,
        env = "SHELFSCAN_STORE_FILE",
        default_value = "shelfscan-products.json"
    )]
    store_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect product pages and store the results
    Collect(CollectArgs),

    /// List stored products
    Products(ProductsArgs),

    /// Show the price/stock change history of a product
    History {
        /// Product id
        product_id: Uuid,

        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show recently finished batch runs (requires DATABASE_URL)
    Runs {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Print the platform dispatch table
    Platforms,
}

#[derive(Args)]
struct CollectArgs {
    /// Product page URLs
    locators: Vec<String>,

    /// Read locators from a file: one per line, or a CSV with a `url`/`locator` column
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Label for the run (defaults to the input file name)
    #[arg(long)]
    label: Option<String>,

    /// Jobs in flight at once
    #[arg(short, long)]
    workers: Option<usize>,

    /// Delay between jobs in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Random extra delay of up to this many milliseconds
    #[arg(long)]
    jitter_ms: Option<u64>,

    /// How long to wait for a page to finish loading
    #[arg(long)]
    load_timeout_ms: Option<u64>,

    /// Pause after load before extracting
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Hard cap on a single job
    #[arg(long)]
    job_timeout_ms: Option<u64>,

    /// Render pages in headless Chromium instead of plain HTTP
    #[arg(long, default_value_t = false)]
    browser: bool,
}

#[derive(Args)]
struct ProductsArgs {
    #[arg(long)]
    platform: Option<String>,

    #[arg(long)]
    category: Option<String>,

    /// Case-insensitive substring of the product name
    #[arg(long)]
    name: Option<String>,

    /// Case-insensitive substring of the description
    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    min_price: Option<f64>,

    #[arg(long)]
    max_price: Option<f64>,

    /// name, price, collected_at, updated_at or platform
    #[arg(long)]
    sort: Option<SortKey>,

    #[arg(long, default_value = "asc")]
    order: SortOrder,

    #[arg(short, long, default_value_t = 50)]
    limit: usize,
}

impl ProductsArgs {
    fn to_query(&self) -> ProductQuery {
        let mut query = ProductQuery::new()
            .with_price_range(self.min_price, self.max_price)
            .with_limit(self.limit);
        if let Some(platform) = &self.platform {
            query = query.with_platform(platform);
        }
        if let Some(category) = &self.category {
            query = query.with_category(category);
        }
        if let Some(name) = &self.name {
            query = query.with_name_contains(name);
        }
        if let Some(description) = &self.description {
            query = query.with_description_contains(description);
        }
        if let Some(key) = self.sort {
            query = query.sorted_by(key, self.order);
        }
        query
    }
}

/// Where products live: PostgreSQL when configured, a JSON file otherwise.
enum Backend {
    Postgres(Database),
    File(MemoryProductStore),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("shelfscan=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect(args) => {
            let registry = Arc::new(build_registry(cli.profiles.as_deref())?);
            let backend = open_backend(&cli.store_file).await?;
            let summary = cmd_collect(args, registry, backend).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.failed > 0 || summary.cancelled {
                std::process::exit(1);
            }
        }
        Commands::Products(args) => match open_backend(&cli.store_file).await? {
            Backend::Postgres(db) => cmd_products(&db.product_repo(), &args).await?,
            Backend::File(store) => cmd_products(&store, &args).await?,
        },
        Commands::History { product_id, limit } => match open_backend(&cli.store_file).await? {
            Backend::Postgres(db) => cmd_history(&db.product_repo(), product_id, limit).await?,
            Backend::File(store) => cmd_history(&store, product_id, limit).await?,
        },
        Commands::Runs { limit } => match open_backend(&cli.store_file).await? {
            Backend::Postgres(db) => cmd_runs(&db.run_repo(), limit).await?,
            Backend::File(_) => bail!("Run history is only kept in PostgreSQL. Set DATABASE_URL."),
        },
        Commands::Platforms => {
            let profiles = load_all_profiles(cli.profiles.as_deref())?;
            cmd_platforms(&profiles);
        }
    }

    Ok(())
}

async fn open_backend(store_file: &Path) -> Result<Backend> {
    match DatabaseConfig::from_env_optional()? {
        Some(config) => {
            let db = Database::connect(&config)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await?;
            Ok(Backend::Postgres(db))
        }
        None => {
            tracing::info!("DATABASE_URL not set, using {}", store_file.display());
            let store = MemoryProductStore::open(store_file)
                .with_context(|| format!("Failed to open store file {}", store_file.display()))?;
            Ok(Backend::File(store))
        }
    }
}

fn load_all_profiles(overrides: Option<&Path>) -> Result<Vec<PlatformProfile>> {
    let builtin = builtin_profiles()?;
    Ok(match overrides {
        Some(path) => merge_profiles(builtin, load_profiles(path)?),
        None => builtin,
    })
}

fn build_registry(overrides: Option<&Path>) -> Result<CapabilityRegistry> {
    Ok(registry_from_profiles(&load_all_profiles(overrides)?)?)
}

/// Read locators from a text list or a CSV file with a `url` or `locator` column.
fn read_locators(path: &Path) -> Result<Vec<String>> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    if !is_csv {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read locator file: {}", path.display()))?;
        return Ok(parse_locator_lines(&text));
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let column = reader
        .headers()?
        .iter()
        .position(|h| {
            let h = h.trim();
            h.eq_ignore_ascii_case("url") || h.eq_ignore_ascii_case("locator")
        })
        .with_context(|| format!("{} has no `url` or `locator` column", path.display()))?;

    let mut locators = Vec::new();
    for record in reader.records() {
        let record = record.context("Malformed CSV row")?;
        if let Some(value) = record.get(column).map(str::trim)
            && !value.is_empty()
        {
            locators.push(value.to_string());
        }
    }
    Ok(locators)
}

fn build_config(args: &CollectArgs) -> Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::from_env()?;
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if args.delay_ms.is_some() || args.jitter_ms.is_some() {
        let delay = args
            .delay_ms
            .map_or(config.rate_limit.delay, Duration::from_millis);
        let jitter = args
            .jitter_ms
            .map_or(config.rate_limit.jitter, Duration::from_millis);
        config = config.with_rate_limit(RateLimitConfig::new(delay).with_jitter(jitter));
    }
    if let Some(ms) = args.load_timeout_ms {
        config = config.with_load_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = args.settle_ms {
        config = config.with_settle_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = args.job_timeout_ms {
        config = config.with_job_timeout(Duration::from_millis(ms));
    }
    config.validate()?;
    Ok(config)
}

async fn cmd_collect(
    args: CollectArgs,
    registry: Arc<CapabilityRegistry>,
    backend: Backend,
) -> Result<BatchSummary> {
    let mut locators = args.locators.clone();
    if let Some(file) = &args.file {
        locators.extend(read_locators(file)?);
    }
    if locators.is_empty() {
        bail!("No locators given. Pass URLs as arguments or use --file.");
    }

    let config = build_config(&args)?;
    let label = args
        .label
        .clone()
        .or_else(|| args.file.as_deref().map(label_from_path));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight jobs and stopping");
            interrupt.cancel();
        }
    });

    let mut options = SubmitOptions::default().with_cancel_token(cancel);
    if let Some(label) = label {
        options = options.with_label(label);
    }

    tracing::info!(
        jobs = locators.len(),
        workers = config.workers,
        delay_ms = config.rate_limit.delay.as_millis() as u64,
        "Starting collection"
    );

    if args.browser {
        #[cfg(feature = "browser")]
        {
            let provider = shelfscan_client::ChromiumContextProvider::launch()
                .await?
                .with_navigation_timeout(config.lifecycle.job_timeout);
            return collect_with(provider, registry, backend, config, locators, options).await;
        }
        #[cfg(not(feature = "browser"))]
        bail!("--browser needs shelfscan built with the `browser` feature");
    }

    let provider = HttpContextProvider::with_timeout(config.lifecycle.job_timeout)?.allow_private_urls();
    collect_with(provider, registry, backend, config, locators, options).await
}

async fn collect_with<P: ContextProvider>(
    provider: P,
    registry: Arc<CapabilityRegistry>,
    backend: Backend,
    config: OrchestratorConfig,
    locators: Vec<String>,
    options: SubmitOptions,
) -> Result<BatchSummary> {
    match backend {
        Backend::Postgres(db) => {
            let orchestrator = Orchestrator::new(provider, registry, db.product_repo(), config)
                .with_archive(db.run_repo());
            run(orchestrator, locators, options).await
        }
        Backend::File(store) => {
            let orchestrator = Orchestrator::new(provider, registry, store, config);
            run(orchestrator, locators, options).await
        }
    }
}

async fn run<P, S, A>(
    orchestrator: Orchestrator<P, S, A>,
    locators: Vec<String>,
    options: SubmitOptions,
) -> Result<BatchSummary>
where
    P: ContextProvider,
    S: ProductStore,
    A: RunArchive,
{
    let summary = orchestrator
        .run_batch(locators, options, Arc::new(TracingProgressSink))
        .await?;
    let stored = orchestrator.store().count().await?;
    tracing::info!(stored, "Products in store");
    Ok(summary)
}

async fn cmd_products<S: ProductStore>(store: &S, args: &ProductsArgs) -> Result<()> {
    let products = store.query(&args.to_query()).await?;
    if products.is_empty() {
        eprintln!("No products match.");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&products)?);
    eprintln!("{} product(s)", products.len());
    Ok(())
}

async fn cmd_history<S: ProductStore>(store: &S, product_id: Uuid, limit: usize) -> Result<()> {
    let Some(product) = store.get(product_id).await? else {
        bail!("No product with id {product_id}");
    };
    let history = store.history(product_id, limit).await?;

    println!("{} ({})", product.fields.name, product.locator);
    if history.is_empty() {
        println!("  no price or stock changes recorded");
        return Ok(());
    }

    let fmt_price = |p: Option<f64>| p.map_or_else(|| "-".to_string(), |p| format!("{p:.2}"));
    for entry in &history {
        let kinds: Vec<&str> = entry.change_kinds.iter().map(|k| k.as_str()).collect();
        println!(
            "  {}  price {} -> {}  stock {} -> {}  [{}]",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            fmt_price(entry.old_price),
            fmt_price(entry.new_price),
            entry.old_stock,
            entry.new_stock,
            kinds.join(", "),
        );
    }
    println!("\nTotal: {} change(s)", history.len());
    Ok(())
}

async fn cmd_runs<A: RunArchive>(archive: &A, limit: usize) -> Result<()> {
    let runs = archive.recent(limit).await?;
    if runs.is_empty() {
        println!("No batch runs archived yet.");
        return Ok(());
    }
    for run in &runs {
        println!(
            "  {}  {}  {:<16} total {:>4}  ok {:>4}  failed {:>4}  skipped {:>4}{}",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.run_id,
            run.label.as_deref().unwrap_or("-"),
            run.total,
            run.succeeded,
            run.failed,
            run.skipped,
            if run.cancelled { "  (cancelled)" } else { "" },
        );
    }
    Ok(())
}

fn cmd_platforms(profiles: &[PlatformProfile]) {
    for profile in profiles {
        let patterns: Vec<String> = profile.patterns.iter().map(ToString::to_string).collect();
        println!("{:<18} {}", profile.id, patterns.join(", "));
    }
    println!("{:<18} anything else (heuristic extraction)", "generic");
}
