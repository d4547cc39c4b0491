use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use weir_core::config::FlowConfig;
use weir_core::error::WeirError;
use weir_flow::{Graph, GraphDefinition};

#[derive(Parser)]
#[command(name = "weir", version, about = "Conditional flow-graph runner with bounded loops")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weir.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Statically validate a flow definition
    Check {
        /// Path to a TOML flow definition
        definition: PathBuf,
    },
    /// Print the execution plan of a flow definition
    Plan {
        /// Path to a TOML flow definition
        definition: PathBuf,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weir=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Check { definition } => {
            let (def, graph) = load_graph(&definition)?;
            info!(
                steps = graph.steps().len(),
                edges = graph.edges().len(),
                "definition is valid"
            );
            println!(
                "{}: {} steps, {} edges, loop ceiling {}",
                definition.display(),
                graph.steps().len(),
                graph.edges().len(),
                def.max_loops.unwrap_or(config.max_loops)
            );
        }
        Commands::Plan { definition } => {
            let (def, graph) = load_graph(&definition)?;
            print_plan(&graph, def.max_loops.unwrap_or(config.max_loops));
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<FlowConfig> {
    match FlowConfig::load(path) {
        Ok(config) => Ok(config),
        Err(WeirError::ConfigNotFound(_)) => Ok(FlowConfig::default()),
        Err(e) => Err(e.into()),
    }
}

fn load_graph(path: &Path) -> anyhow::Result<(GraphDefinition, Graph)> {
    let def = GraphDefinition::load(path)?;
    let graph = def.build()?;
    Ok((def, graph))
}

fn print_plan(graph: &Graph, max_loops: u32) {
    let entries = graph.entry_steps();
    println!("loop ceiling: {max_loops}");
    for (i, step) in graph.steps().iter().enumerate() {
        let marker = if entries.contains(&i) { " (entry)" } else { "" };
        println!("step {}{marker} [executor: {}]", step.name, step.executor);
        for input in &step.inputs {
            let kind = if step.external.iter().any(|n| n == input) {
                "external"
            } else if step.optional.iter().any(|n| n == input) {
                "optional"
            } else {
                "bound"
            };
            println!("  in  {input} ({kind})");
        }
        for output in &step.outputs {
            println!("  out {output}");
        }
        for route in &step.routes {
            println!("  route {:?} -> {}", route.when, route.branch);
        }
    }
    for edge in graph.edges() {
        match edge.max_traversals {
            Some(limit) => println!("edge {} (loop limit {limit})", edge.label()),
            None => println!("edge {}", edge.label()),
        }
    }
}
