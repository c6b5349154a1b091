//! tracehist CLI
//!
//! Command-line interface for building and querying state histories:
//! - Build a history tree from a text event stream
//! - Query attribute state at a point in time or over a range
//! - Inspect a history file
//! - Generate a default config

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracehist::checkpoint::CheckpointIndex;
use tracehist::config::{generate_default_config, Config};
use tracehist::history::{HistoryPipeline, HistoryTree};
use tracehist::source::{
    AttributeRegistry, EventSource, QuarkResolver, StateTracker, TextEventSource,
};

#[derive(Parser)]
#[command(name = "tracehist")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Disk-backed state history for trace analysis")]
#[command(
    long_about = "tracehist builds a queryable state history from a stream of\nattribute-change events and answers \"what was the value of attribute A at time T\"."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (default: standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a history tree from a text event stream
    Build {
        /// Input file, one `timestamp|attribute/path|value` event per line
        input: PathBuf,
        /// Output history file
        #[arg(short, long, default_value = "trace.ht")]
        output: PathBuf,
    },

    /// Query the state of one attribute at a point in time
    Query {
        /// History file produced by `build`
        history: PathBuf,
        /// Attribute path, e.g. cpu/0/status
        attribute: String,
        /// Timestamp to query
        time: i64,
    },

    /// List every interval of one attribute inside a time range
    Range {
        /// History file produced by `build`
        history: PathBuf,
        /// Attribute path
        attribute: String,
        /// Range start
        from: i64,
        /// Range end
        to: i64,
    },

    /// Show metadata of a history file
    Info {
        /// History file
        history: PathBuf,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config);

    match cli.command {
        Commands::Build { input, output } => run_build(&config, &input, &output),
        Commands::Query {
            history,
            attribute,
            time,
        } => run_query(&config, &history, &attribute, time),
        Commands::Range {
            history,
            attribute,
            from,
            to,
        } => run_range(&config, &history, &attribute, from, to),
        Commands::Info { history } => run_info(&config, &history),
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing config to {:?}", path))?;
                    println!("Wrote default config to {:?}", path);
                }
                None => print!("{}", content),
            }
            Ok(())
        }
    }
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("tracehist={}", config.logging.level)),
    );
    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn run_build(config: &Config, input: &Path, output: &Path) -> anyhow::Result<()> {
    let mut source =
        TextEventSource::open(input).with_context(|| format!("opening input {:?}", input))?;
    let start = source.start_time();

    let tree = Arc::new(HistoryTree::create(
        output,
        start,
        config.history.tree_params(),
    )?);
    let pipeline = HistoryPipeline::new(config.pipeline.queue_capacity);
    pipeline.attach(Arc::clone(&tree))?;

    let mut registry = AttributeRegistry::new();
    let mut tracker = StateTracker::new(&pipeline);
    let mut index = CheckpointIndex::new();

    let mut events: u64 = 0;
    let mut last_ts = start;
    while let Some(event) = source.next_event()? {
        if events % config.checkpoint.interval_events == 0 {
            index.insert(event.timestamp, events);
        }
        let quark = registry.quark_for(&event.path);
        tracker.apply(quark, event.timestamp, event.value)?;
        last_ts = last_ts.max(event.timestamp);
        events += 1;
    }

    tracker.finish(last_ts)?;
    pipeline.close(last_ts)?;
    tree.write_trailing_data(&registry.to_json()?)?;
    index.save(output)?;

    println!(
        "Built {:?}: {} events, {} attributes, {} intervals, {} nodes, range [{}, {}]",
        output,
        events,
        registry.len(),
        tree.interval_count(),
        tree.node_count(),
        start,
        last_ts
    );
    Ok(())
}

/// Open a finished history together with its attribute registry
fn open_history(config: &Config, path: &Path) -> anyhow::Result<(HistoryTree, AttributeRegistry)> {
    let tree = HistoryTree::open(
        path,
        config.history.provider_version,
        config.history.read_cache_size,
    )
    .with_context(|| format!("opening history {:?}", path))?;
    let registry = AttributeRegistry::from_json(&tree.read_trailing_data()?)
        .context("history file has no readable attribute registry")?;
    Ok((tree, registry))
}

fn run_query(config: &Config, history: &Path, attribute: &str, time: i64) -> anyhow::Result<()> {
    let (tree, registry) = open_history(config, history)?;
    let Some(quark) = registry.lookup(attribute) else {
        bail!("unknown attribute: {}", attribute);
    };

    match tree.query_state(quark, time)? {
        Some(interval) => println!("{} @ {}: {}", attribute, time, interval),
        None => println!("{} @ {}: no state", attribute, time),
    }
    Ok(())
}

fn run_range(
    config: &Config,
    history: &Path,
    attribute: &str,
    from: i64,
    to: i64,
) -> anyhow::Result<()> {
    let (tree, registry) = open_history(config, history)?;
    let Some(quark) = registry.lookup(attribute) else {
        bail!("unknown attribute: {}", attribute);
    };

    let mut count = 0usize;
    for item in tree.query_range(quark, from, to)? {
        println!("{}", item?);
        count += 1;
    }
    println!("{} intervals of {} in [{}, {}]", count, attribute, from, to);
    Ok(())
}

fn run_info(config: &Config, history: &Path) -> anyhow::Result<()> {
    let (tree, registry) = open_history(config, history)?;
    println!("History file:     {:?}", history);
    println!("Time range:       [{}, {}]", tree.start_time(), tree.end_time());
    println!("Nodes:            {}", tree.node_count());
    println!("Attributes:       {}", registry.len());
    println!("Provider version: {}", tree.provider_version());

    let (index, restored) = CheckpointIndex::open(history);
    if restored {
        println!("Checkpoints:      {}", index.len());
    } else {
        println!("Checkpoints:      none (index missing or discarded)");
    }
    Ok(())
}
