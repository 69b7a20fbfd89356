mod catalog;
mod commands;
mod project;

use clap::{Parser, Subcommand};
use project::Project;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strato")]
#[command(about = "Declare cloud resources, reconcile them, keep the state.", long_about = None)]
struct Cli {
    /// Config file (skips discovery)
    #[arg(short, long, global = true, env = "STRATOFLOW_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what apply would change
    Plan {
        /// Only this resource (type.name)
        #[arg(short, long)]
        target: Option<String>,
    },
    /// Reconcile remote resources with the configuration
    Apply {
        /// Only this resource (type.name)
        #[arg(short, long)]
        target: Option<String>,
    },
    /// Delete declared resources
    Destroy {
        /// Only this resource (type.name)
        #[arg(short, long)]
        target: Option<String>,
    },
    /// Adopt an existing remote resource
    Import {
        /// Address to manage it under (type.name)
        address: String,
        /// Remote ID
        id: String,
    },
    /// Inspect the state file
    #[command(subcommand)]
    State(StateCommands),
    /// List built-in resource types
    Catalog {
        /// Only this type
        type_name: Option<String>,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum StateCommands {
    /// List managed resources
    List,
    /// Show one managed resource
    Show {
        /// type.name
        address: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that need no project
    match &cli.command {
        Commands::Version => {
            println!("strato {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Catalog { type_name } => {
            return commands::catalog::handle(type_name.as_deref());
        }
        _ => {}
    }

    let project = Project::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Plan { target } => commands::plan::handle(&project, target.as_deref()).await,
        Commands::Apply { target } => {
            commands::apply::handle(&project, target.as_deref(), false).await
        }
        Commands::Destroy { target } => {
            commands::apply::handle(&project, target.as_deref(), true).await
        }
        Commands::Import { address, id } => {
            commands::import::handle(&project, &address, &id).await
        }
        Commands::State(StateCommands::List) => commands::state::handle_list(&project).await,
        Commands::State(StateCommands::Show { address }) => {
            commands::state::handle_show(&project, &address).await
        }
        Commands::Version | Commands::Catalog { .. } => Ok(()),
    }
}
