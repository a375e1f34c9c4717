use marquee::cli::{Cli, Commands, ConfigAction};
use marquee::config::Config;
use marquee::conversation::ConversationEvent;
use marquee::error::{MarqueeError, Result};
use marquee::retrieval::{RetrievalTrace, TierStatus};
use marquee::Pipeline;
use std::io::Read;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Runtime::new().map_err(|e| MarqueeError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;

    runtime.block_on(run(cli))
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "marquee=debug" } else { "marquee=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Query {
            query,
            limit,
            json,
            explain,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_query(config, &query, limit, json, explain).await?;
        }
        Commands::Ask {
            question,
            offline,
            limit,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ask(config, &question, offline, limit, json).await?;
        }
        Commands::Respond { event } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_respond(config, event.as_deref()).await?;
        }
        Commands::Ingest { file } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ingest(config, &file).await?;
        }
        Commands::Backfill { max } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_backfill(config, max).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

async fn cmd_query(
    config: Config,
    query: &str,
    limit: Option<usize>,
    json: bool,
    explain: bool,
) -> Result<()> {
    let pipeline = Pipeline::open(config, true).await?;
    let trace = pipeline.query(query, limit).await;

    if json {
        let value = if explain {
            serde_json::to_value(&trace)
        } else {
            serde_json::to_value(&trace.documents)
        };
        print_json(&value.map_err(|e| json_error(e, "Failed to serialize results"))?)?;
        return Ok(());
    }

    if explain {
        print_trace(&trace);
    }

    if trace.documents.is_empty() {
        println!("No documents found for '{}'", query);
        return Ok(());
    }

    println!("{} results ({} search)\n", trace.documents.len(), trace.tier);
    for (i, doc) in trace.documents.iter().enumerate() {
        let year = doc.year.map(|y| format!(" ({})", y)).unwrap_or_default();
        println!("{}. {}{}  [score {:.3}]", i + 1, doc.title, year, doc.score);
        if !doc.genres.is_empty() {
            println!("   Genres: {}", doc.genres.join(", "));
        }
        if !doc.text.is_empty() {
            println!("   {}", preview(&doc.text, 200));
        }
        println!();
    }

    Ok(())
}

fn print_trace(trace: &RetrievalTrace) {
    println!("Tiers attempted:");
    for attempt in &trace.attempts {
        let detail = match &attempt.status {
            TierStatus::Found { count } => format!("found {}", count),
            TierStatus::Empty => "empty".to_string(),
            TierStatus::Failed { reason } => format!("failed: {}", reason),
        };
        println!("  {:<9} {}", attempt.tier.to_string(), detail);
    }
    println!();
}

async fn cmd_ask(
    config: Config,
    question: &str,
    offline: bool,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let pipeline = Pipeline::open(config, offline).await?;
    let answer = pipeline.ask(question, limit).await?;

    if json {
        let value =
            serde_json::to_value(&answer).map_err(|e| json_error(e, "Failed to serialize answer"))?;
        return print_json(&value);
    }

    println!("{}\n", answer.text);
    if !answer.source_documents.is_empty() {
        println!("Sources:");
        for doc in &answer.source_documents {
            println!("  - {} [{}]", doc.title, doc.source_tier);
        }
    }

    Ok(())
}

async fn cmd_respond(config: Config, event_path: Option<&Path>) -> Result<()> {
    let raw = match event_path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| MarqueeError::Io {
            source: e,
            context: format!("Failed to read event file: {:?}", path),
        })?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| MarqueeError::Io {
                    source: e,
                    context: "Failed to read event from stdin".to_string(),
                })?;
            buffer
        }
    };

    let event: ConversationEvent =
        serde_json::from_str(&raw).map_err(|e| json_error(e, "Invalid conversation event"))?;

    let pipeline = Pipeline::open(config, false).await?;
    let response = pipeline.adapter().handle(&event).await;

    let value = serde_json::to_value(&response)
        .map_err(|e| json_error(e, "Failed to serialize response"))?;
    print_json(&value)
}

async fn cmd_ingest(config: Config, file: &Path) -> Result<()> {
    let pipeline = Pipeline::open(config, true).await?;
    let store = pipeline.store().local().ok_or_else(|| {
        MarqueeError::Config("Ingest only supports the local store backend".to_string())
    })?;

    let stats = store.ingest_file(file).await?;
    let totals = store.stats().await?;

    println!("✓ Ingested {} movies from {}", stats.inserted, file.display());
    if stats.skipped > 0 {
        println!("  {} already present", stats.skipped);
    }
    if stats.vectors > 0 || stats.invalid_vectors > 0 {
        println!(
            "  {} precomputed vectors stored, {} rejected",
            stats.vectors, stats.invalid_vectors
        );
    }
    println!(
        "  Store now holds {} movies, {} with vectors",
        totals.movies, totals.vectors
    );

    Ok(())
}

async fn cmd_backfill(config: Config, max: Option<usize>) -> Result<()> {
    let pipeline = Pipeline::open(config, true).await?;
    let result = pipeline.backfill(max).await?;

    println!(
        "✓ Embedded {} of {} pending documents ({} failed, {}ms)",
        result.processed, result.pending, result.failed, result.duration_ms
    );

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config)
                .map_err(|e| json_error(e, "Failed to serialize config"))?;

            match section {
                Some(section) => {
                    let part = value.get(&section).ok_or_else(|| {
                        MarqueeError::Config(format!("Unknown config section: {}", section))
                    })?;
                    print_json(part)?;
                }
                None => print_json(&value)?,
            }
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = match profile {
                Some(profile) => Config::load_with_profile(&path, &profile)?,
                None => Config::load(&path)?,
            };
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!(
                "  Store: {}, embedding: {}, generation: {}",
                config.store.backend,
                config.embedding.mode,
                if config.generation.enabled { "enabled" } else { "disabled" }
            );
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'marquee config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        marquee::config::ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|e| json_error(e, "Failed to render JSON"))?;
    println!("{}", rendered);
    Ok(())
}

fn json_error(source: serde_json::Error, context: &str) -> MarqueeError {
    MarqueeError::Json {
        source,
        context: context.to_string(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
