//! infragraph CLI
//!
//! Loads construct graphs, validates them, orders them and exports them.

use clap::{Parser, Subcommand};
use infragraph::graph::{load_construct_graph, ConstructDocument};
use infragraph::output::{FileSet, HasLocalOutput, RawFile};
use infragraph::EngineConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "infragraph")]
#[command(about = "Inspect and export construct graphs")]
struct Cli {
    /// Configuration file layered over the defaults
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a construct graph and report what it contains
    Validate {
        /// Construct document (.yaml or .json)
        file: PathBuf,
    },

    /// Print construct ids in dependency order
    Order {
        file: PathBuf,
    },

    /// Export a construct graph as GraphViz DOT
    Dot {
        file: PathBuf,
        /// Output directory (defaults to output.out_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show {
        #[arg(long, conflicts_with = "json")]
        toml: bool,
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    Init {
        #[arg(short, long, default_value = "infragraph.toml")]
        output: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match EngineConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli.command, config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Validate { file } => {
            let graph = load_construct_graph(&file)?;
            println!("✅ {}", file.display());
            println!("  constructs:   {}", graph.len());
            println!("  dependencies: {}", graph.dependency_count());
            // surfaces cycles as a validation failure
            graph.topological_sort()?;

            let roots = graph.roots();
            if !roots.is_empty() {
                println!("  roots:");
                for root in roots {
                    println!("    - {}", root.id());
                }
            }
            Ok(())
        }

        Commands::Order { file } => {
            let graph = load_construct_graph(&file)?;
            for id in graph.topological_sort()? {
                println!("{}", id);
            }
            Ok(())
        }

        Commands::Dot { file, output } => {
            let graph = load_construct_graph(&file)?;
            let dest = output.unwrap_or_else(|| config.out_dir());
            let format = config.output.format;

            let files = FileSet::new().with_limit(config.write_limit());
            files.add(RawFile::new("constructs.dot", graph.to_dot()));
            files.add(RawFile::new(
                format!("constructs.{}", format.extension()),
                ConstructDocument::from_graph(&graph).render(format)?,
            ));
            files.output_to(&dest)?;

            println!("✅ Exported {} files to {}", files.len(), dest.display());
            Ok(())
        }

        Commands::Config { action } => match action {
            ConfigAction::Show { toml, json } => {
                print!("{}", render_config(&config, toml, json)?);
                Ok(())
            }
            ConfigAction::Init { output } => {
                EngineConfig::default().save(&output)?;
                println!("✅ Wrote default configuration to {}", output);
                Ok(())
            }
        },
    }
}

/// `--toml` is the default; clap rejects both flags together
fn render_config(config: &EngineConfig, toml: bool, json: bool) -> Result<String, Box<dyn std::error::Error>> {
    match (toml, json) {
        (false, true) => Ok(format!("{}\n", serde_json::to_string_pretty(config)?)),
        (true, false) | (false, false) => Ok(config.to_toml()?),
        (true, true) => Err("--toml and --json are mutually exclusive".into()),
    }
}
