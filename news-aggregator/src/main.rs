use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use news_aggregator::config::DEFAULT_CONFIG_PATH;
use news_aggregator::{
    AnalysisEngine, AppConfig, Article, ArticleFilter, ArticleStore, ContentPipeline, FeedSource, Fetcher,
    Ingester, OpenAiAnalyzer, ProcessOptions, PullFeed, RunReport,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "news-aggregator")]
#[command(about = "Ingest news feeds, extract article text and analyze it with an LLM")]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration and create the database
    Init {
        /// Replace an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Poll sources and store new articles
    Fetch {
        /// Only poll this source
        #[arg(long)]
        source: Option<String>,
    },

    /// Download and extract article pages
    FetchHtml {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run LLM analysis on stored articles
    Process {
        #[arg(long)]
        limit: Option<usize>,

        /// Analyze one article regardless of its state
        #[arg(long)]
        article_id: Option<i64>,

        /// Replace an existing analysis
        #[arg(long)]
        overwrite: bool,
    },

    /// List stored articles, newest first
    List {
        #[arg(long)]
        source: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        unanalyzed: bool,

        #[arg(long)]
        unextracted: bool,
    },

    /// Show database statistics
    Stats,

    /// Show one article in full
    View { id: i64 },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force } = cli.command {
        return cmd_init(&cli.config, force).await;
    }

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let store = ArticleStore::new(&config.database.url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.url))?;

    match cli.command {
        Commands::Fetch { source } => cmd_fetch(&config, store, source).await,
        Commands::FetchHtml { limit } => cmd_fetch_html(&config, store, limit).await,
        Commands::Process {
            limit,
            article_id,
            overwrite,
        } => {
            cmd_process(
                &config,
                store,
                ProcessOptions {
                    limit,
                    article_id,
                    overwrite,
                },
            )
            .await
        }
        Commands::List {
            source,
            limit,
            unanalyzed,
            unextracted,
        } => {
            let mut filter = ArticleFilter::default().limit(limit);
            if let Some(source) = source {
                filter = filter.source(source);
            }
            if unanalyzed {
                filter = filter.unanalyzed_only();
            }
            if unextracted {
                filter = filter.unextracted_only();
            }
            cmd_list(store, &filter).await
        }
        Commands::Stats => cmd_stats(store).await,
        Commands::View { id } => cmd_view(store, id).await,
        Commands::Init { force } => cmd_init(&cli.config, force).await,
    }
}

async fn cmd_init(path: &Path, force: bool) -> Result<()> {
    AppConfig::init(path, force)?;
    let config = AppConfig::load(path)
        .with_context(|| format!("Failed to read back {}", path.display()))?;

    ArticleStore::new(&config.database.url)
        .await
        .with_context(|| format!("Failed to create database {}", config.database.url))?;

    println!("Wrote {}", path.display());
    println!("Database ready at {}", config.database.url);
    Ok(())
}

async fn cmd_fetch(config: &AppConfig, store: ArticleStore, only: Option<String>) -> Result<()> {
    let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);

    let mut sources: Vec<Box<dyn PullFeed>> = Vec::new();
    for source_config in config.effective_sources() {
        sources.push(Box::new(FeedSource::from_config(&source_config, fetcher.clone())?));
    }

    let ingester = Ingester::new(store, sources)
        .with_poll_timeout(Duration::from_secs(config.fetch.operation_timeout_seconds));

    info!("Sources: {}", ingester.source_names().join(", "));

    let report = match only {
        Some(name) => ingester.run_source(&name).await?,
        None => ingester.run().await?,
    };

    for tally in &report.sources {
        println!(
            "{}: {} polled, {} new, {} refreshed, {} unchanged",
            tally.source, tally.polled, tally.new, tally.refreshed, tally.unchanged
        );
    }
    print_report("Fetch", &report);
    Ok(())
}

async fn cmd_fetch_html(config: &AppConfig, store: ArticleStore, limit: Option<usize>) -> Result<()> {
    let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);
    let pipeline = ContentPipeline::new(store, fetcher)?
        .with_fetch_timeout(Duration::from_secs(config.fetch.operation_timeout_seconds));

    let report = pipeline.run(limit).await?;
    print_report("Extraction", &report);
    Ok(())
}

async fn cmd_process(config: &AppConfig, store: ArticleStore, options: ProcessOptions) -> Result<()> {
    let analyzer = Arc::new(OpenAiAnalyzer::new(&config.llm).context("Cannot build the LLM client")?);
    let engine = AnalysisEngine::new(store, analyzer, &config.analysis)
        .with_call_timeout(Duration::from_secs(config.llm.timeout_seconds));

    let report = engine.run(options).await?;
    print_report("Analysis", &report);
    Ok(())
}

async fn cmd_list(store: ArticleStore, filter: &ArticleFilter) -> Result<()> {
    let articles = store.list_articles(filter).await?;

    if articles.is_empty() {
        println!("No articles found");
        return Ok(());
    }

    for article in &articles {
        let marks = format!(
            "{}{}",
            if article.extracted_text.is_some() { "E" } else { "-" },
            if article.is_analyzed() { "A" } else { "-" }
        );
        println!(
            "{:>6}  {}  {}  [{}] {}",
            article.id,
            article.published_at.format("%Y-%m-%d %H:%M"),
            marks,
            article.source,
            article.headline
        );
    }
    println!("{} articles", articles.len());
    Ok(())
}

async fn cmd_stats(store: ArticleStore) -> Result<()> {
    let stats = store.stats().await?;

    println!("Total articles:    {}", stats.total_articles);
    println!("With extracted:    {}", stats.extracted);
    println!("Analyzed:          {}", stats.analyzed);
    println!("Pending analysis:  {}", stats.pending_analysis);

    if !stats.by_source.is_empty() {
        println!("\nBy source:");
        for (source, count) in &stats.by_source {
            println!("  {}: {}", source, count);
        }
    }

    if !stats.cursors.is_empty() {
        println!("\nCursors:");
        for cursor in &stats.cursors {
            let seen = cursor
                .last_seen_published_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {}: polled {}, newest {}",
                cursor.source_name,
                cursor.last_polled_at.to_rfc3339(),
                seen
            );
        }
    }
    Ok(())
}

async fn cmd_view(store: ArticleStore, id: i64) -> Result<()> {
    let article = store
        .get_article(id)
        .await?
        .with_context(|| format!("Article {} not found", id))?;

    print_article(&article)
}

fn print_article(article: &Article) -> Result<()> {
    println!("# {}", article.headline);
    println!("id:        {}", article.id);
    println!("url:       {}", article.url);
    println!("source:    {}", article.source);
    println!("published: {}", article.published_at.to_rfc3339());
    println!("fetched:   {}", article.fetched_at.to_rfc3339());
    println!("state:     {}", article.analysis_state);
    if let Some(last_error) = &article.last_error {
        println!("last error: {}", last_error);
    }
    if let Some(extraction_error) = &article.extraction_error {
        println!("extraction error: {}", extraction_error);
    }

    if let Some(summary) = &article.summary_content {
        println!("\n## Summary\n{}", summary);
    }
    if let Some(text) = &article.extracted_text {
        println!("\n## Extracted text\n{}", text);
    }
    if let Some(analysis) = &article.analysis {
        println!("\n## Analysis\n{}", serde_json::to_string_pretty(analysis)?);
    }
    Ok(())
}

fn print_report(label: &str, report: &RunReport) {
    println!(
        "{} run {}: {} succeeded, {} failed, {} skipped",
        label,
        report.run_id,
        report.succeeded,
        report.failed.len(),
        report.skipped.len()
    );
    for failure in &report.failed {
        println!("  failed  {} ({:?}): {}", failure.key, failure.kind, failure.reason);
    }
    for skip in &report.skipped {
        println!("  skipped {}: {}", skip.key, skip.reason);
    }
}
