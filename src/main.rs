//! egg CLI: build event-grounded graphs and answer queries over them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use egg_graph::bench::{self, BatchRunner};
use egg_graph::config::EggConfig;
use egg_graph::error::EggResult;
use egg_graph::export::GraphSnapshot;
use egg_graph::graph::egg::EventGroundedGraph;
use egg_graph::id::EntityId;
use egg_graph::ingest;
use egg_graph::oracle::Oracle;
use egg_graph::oracle::ollama::OllamaOracle;
use egg_graph::query::{QueryProcessor, RetrievalStrategy};
use egg_graph::slice::Slicer;
use egg_graph::temporal::{TimeRange, Timestamp};

#[derive(Parser)]
#[command(name = "egg", version, about = "Event-grounded graph retrieval")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a graph from perception observations.
    Ingest {
        /// JSON array of event observations.
        #[arg(long)]
        observations: PathBuf,

        /// Where to write the graph snapshot.
        #[arg(long)]
        output: PathBuf,

        /// Also derive room nodes from event odometry and print them.
        #[arg(long)]
        rooms: bool,
    },

    /// Show graph statistics.
    Info {
        #[arg(long)]
        graph: PathBuf,
    },

    /// Prune a graph without an oracle and print the result.
    Slice {
        #[arg(long)]
        graph: PathBuf,

        /// Keep events starting at or after this local time (YYYY-MM-DD HH:MM:SS).
        #[arg(long)]
        start: Option<String>,

        /// Keep events ending at or before this local time.
        #[arg(long)]
        end: Option<String>,

        /// Keep events at this location (repeatable).
        #[arg(long)]
        location: Vec<String>,

        /// Keep events touching this object id (repeatable).
        #[arg(long)]
        object: Vec<u64>,
    },

    /// Answer a query with the configured Ollama model.
    Query {
        #[arg(long)]
        graph: PathBuf,

        #[arg(long)]
        query: String,

        /// node, text, binary, time_point, time_interval, time_duration or position.
        #[arg(long, default_value = "text")]
        modality: String,

        /// Overrides [retrieval].strategy.
        #[arg(long)]
        strategy: Option<RetrievalStrategy>,
    },

    /// Run a QA set and record every answer.
    Bench {
        #[arg(long)]
        graph: PathBuf,

        /// JSON array of {"query", "modality", "answer"} objects.
        #[arg(long)]
        cases: PathBuf,

        /// Results file; existing records are kept and their cases skipped.
        #[arg(long)]
        output: PathBuf,

        /// Overrides [retrieval].strategy.
        #[arg(long)]
        strategy: Option<RetrievalStrategy>,

        /// Cases in flight at once.
        #[arg(long, default_value = "1")]
        jobs: usize,
    },

    /// Write the effective configuration as TOML.
    Config {
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EggConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            observations,
            output,
            rooms,
        } => {
            let observations = ingest::load_observations(&observations)?;
            let mut graph = EventGroundedGraph::new(config.matcher());
            for observation in &observations {
                graph.add_event_from_observation(observation, &config.camera)?;
            }
            if rooms {
                graph.generate_room_nodes()?;
                for room in graph.spatial().rooms().values() {
                    println!("{room}");
                }
            }
            graph.serialize().write_to(&output)?;
            println!("{}", graph.stats());
            println!("Wrote {}", output.display());
        }

        Commands::Info { graph } => {
            let graph = load_graph(&graph, &config)?;
            println!("{}", graph.stats());
            if let Some((start, end)) = graph.events().get_time_range() {
                println!("Time range: {start} .. {end}");
            }
            println!("Locations: {}", graph.events().get_locations().join(", "));
            println!("Matcher: {}", graph.spatial().matcher().name());
        }

        Commands::Slice {
            graph,
            start,
            end,
            location,
            object,
        } => {
            let baseline = Arc::new(load_graph(&graph, &config)?);
            let mut slicer = Slicer::new(baseline);
            if start.is_some() || end.is_some() {
                slicer.prune_by_time_range(&time_range(start.as_deref(), end.as_deref())?);
            }
            if !location.is_empty() {
                slicer.prune_by_location(&location);
            }
            if !object.is_empty() {
                let ids: Vec<EntityId> = object.into_iter().filter_map(EntityId::new).collect();
                slicer.prune_by_objects(&ids);
            }
            let json = slicer.working().serialize().to_json()?;
            println!("{json}");
        }

        Commands::Query {
            graph,
            query,
            modality,
            strategy,
        } => {
            let baseline = Arc::new(load_graph(&graph, &config)?);
            let oracle = connect(&config);
            let strategy = strategy.unwrap_or(config.retrieval.strategy);
            let mut processor = QueryProcessor::new(Slicer::new(baseline), oracle, strategy)
                .with_transient_retries(config.oracle.transient_retries);
            if let Some(now) = config.current_time()? {
                processor = processor.with_current_time(now);
            }
            let outcome = processor.process_query(&query, &modality)?;
            match &outcome.answer {
                Some(answer) => {
                    println!("{}", serde_json::to_string_pretty(answer).into_diagnostic()?)
                }
                None => println!("{}", outcome.answer_raw),
            }
            println!(
                "Tokens: {} in, {} out",
                outcome.usage.input_tokens, outcome.usage.output_tokens
            );
        }

        Commands::Bench {
            graph,
            cases,
            output,
            strategy,
            jobs,
        } => {
            let baseline = Arc::new(load_graph(&graph, &config)?);
            let cases = bench::load_cases(&cases)?;
            let mut results = bench::load_results(&output)?;
            let runner = BatchRunner::new(
                baseline,
                connect(&config),
                strategy.unwrap_or(config.retrieval.strategy),
            )
            .with_current_time(config.current_time()?)
            .with_transient_retries(config.oracle.transient_retries);

            let summary = if jobs > 1 {
                let summary = runner.run_parallel(&cases, &mut results, jobs)?;
                bench::write_results(&output, &results)?;
                summary
            } else {
                runner.run(&cases, &mut results, |results| {
                    bench::write_results(&output, results)
                })?
            };
            println!(
                "{} succeeded, {} failed, {} skipped",
                summary.succeeded, summary.failed, summary.skipped
            );
            println!(
                "Tokens: {} in, {} out",
                summary.usage.input_tokens, summary.usage.output_tokens
            );
        }

        Commands::Config { output } => {
            config.save(&output)?;
            println!("Wrote {}", output.display());
        }
    }

    Ok(())
}

fn load_graph(path: &Path, config: &EggConfig) -> EggResult<EventGroundedGraph> {
    let snapshot = GraphSnapshot::read_from(path)?;
    Ok(EventGroundedGraph::deserialize(&snapshot, config.matcher())?)
}

fn time_range(start: Option<&str>, end: Option<&str>) -> EggResult<TimeRange> {
    let min = start
        .map(Timestamp::parse_local)
        .transpose()?
        .unwrap_or(Timestamp::ZERO);
    let max = end
        .map(Timestamp::parse_local)
        .transpose()?
        .unwrap_or(Timestamp::MAX);
    Ok(TimeRange::new(min, max)?)
}

/// Ollama client for the configured server. An unreachable server or a
/// missing model is only warned about; the first query reports the failure.
fn connect(config: &EggConfig) -> OllamaOracle {
    let mut oracle = OllamaOracle::new(config.ollama());
    if !oracle.probe() {
        tracing::warn!(url = %config.oracle.base_url, "ollama is not reachable");
    } else if !oracle.has_model() {
        tracing::warn!(model = %oracle.name(), "model not found on the ollama server, try `ollama pull`");
    }
    oracle
}
