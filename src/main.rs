use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::{ArgAction, Parser, ValueEnum};
use sgl_shard_coordinator::{
    observability::{init_logging, LoggingConfig},
    simulation::{ShardBehavior, SimulatedCluster},
    ComponentConfig, ComponentFactories, ComponentRegistry, CoordinatorConfigBuilder,
    SearchRequest, ShardId, StageCoordinator,
};
use tracing::Level;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "sgl-shard-coordinator")]
#[command(about = "Run a search request through the stage-barrier coordinator over a simulated cluster")]
struct CliArgs {
    /// Query string
    #[arg(short, long, default_value = "rust search")]
    query: String,

    /// Number of documents to return
    #[arg(long, default_value_t = 10)]
    rows: u64,

    /// Number of simulated shards; 0 runs the single-node path
    #[arg(long, default_value_t = 4)]
    shards: usize,

    #[arg(long, default_value_t = 50)]
    docs_per_shard: usize,

    /// Simulated per-call latency range in milliseconds
    #[arg(long, default_value_t = 1)]
    latency_min_ms: u64,

    #[arg(long, default_value_t = 25)]
    latency_max_ms: u64,

    /// Shards that answer slowly (repeatable)
    #[arg(long, action = ArgAction::Append)]
    slow_shard: Vec<String>,

    /// Extra delay for slow shards
    #[arg(long, default_value_t = 2_000)]
    slow_ms: u64,

    /// Shards that answer every call with an error (repeatable)
    #[arg(long, action = ArgAction::Append)]
    failing_shard: Vec<String>,

    /// Shards that cannot be reached (repeatable)
    #[arg(long, action = ArgAction::Append)]
    down_shard: Vec<String>,

    #[arg(long, default_value_t = 1_000)]
    shard_timeout_ms: u64,

    #[arg(long)]
    request_timeout_ms: Option<u64>,

    #[arg(long, default_value_t = 64)]
    max_rounds: u32,

    #[arg(long)]
    max_concurrent_calls: Option<usize>,

    /// Fail the request instead of returning partial results
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Send one wire call per shard request
    #[arg(long, default_value_t = false)]
    no_coalesce: bool,

    /// Include per-shard debug information
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Print the registered components and exit
    #[arg(long, default_value_t = false)]
    list_components: bool,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[arg(long, default_value_t = false)]
    json_logs: bool,

    #[arg(long)]
    log_dir: Option<String>,
}

fn build_cluster(args: &CliArgs) -> anyhow::Result<SimulatedCluster> {
    let cluster = SimulatedCluster::generate(args.shards, args.docs_per_shard)
        .with_latency(args.latency_min_ms, args.latency_max_ms);

    let behaviors = args
        .slow_shard
        .iter()
        .map(|s| (s, ShardBehavior::Slow(Duration::from_millis(args.slow_ms))))
        .chain(
            args.failing_shard
                .iter()
                .map(|s| (s, ShardBehavior::Failing("simulated failure".to_string()))),
        )
        .chain(args.down_shard.iter().map(|s| (s, ShardBehavior::Down)));

    for (shard, behavior) in behaviors {
        if !cluster.set_behavior(&ShardId::new(shard.as_str()), behavior) {
            anyhow::bail!("Unknown shard '{}'", shard);
        }
    }
    Ok(cluster)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let _log_guard = init_logging(LoggingConfig {
        level: args.log_level.into(),
        json_format: args.json_logs,
        log_dir: args.log_dir.clone(),
        ..LoggingConfig::default()
    });

    let mut builder = CoordinatorConfigBuilder::new()
        .shard_timeout_ms(args.shard_timeout_ms)
        .max_rounds(args.max_rounds)
        .coalesce_requests(!args.no_coalesce);
    if let Some(timeout_ms) = args.request_timeout_ms {
        builder = builder.request_timeout_ms(timeout_ms);
    }
    if let Some(limit) = args.max_concurrent_calls {
        builder = builder.max_concurrent_calls(limit);
    }
    if args.strict {
        builder = builder.strict();
    }
    let config = builder.build().context("invalid coordinator configuration")?;

    let registry = ComponentRegistry::from_configs(
        vec![
            ComponentConfig::new("query", "query"),
            ComponentConfig::new("debug", "debug"),
        ],
        &ComponentFactories::builtin(),
    )?;

    if args.list_components {
        println!("{}", serde_json::to_string_pretty(&registry.describe())?);
        return Ok(());
    }

    let cluster = build_cluster(&args)?;
    let shards = cluster.shard_ids();
    let coordinator = StageCoordinator::new(Arc::new(registry), Arc::new(cluster), config);

    let request = SearchRequest::new()
        .with_param("q", args.query.clone())
        .with_param("rows", args.rows)
        .with_param("debug", args.debug)
        .with_shards(shards);

    let response = coordinator.execute(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
