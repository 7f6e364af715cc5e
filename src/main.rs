//! kubeapp CLI - Kubernetes application lifecycle manager

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use kubeapp::commands;
use kubeapp::config::settings::Settings;
use kubeapp::utils::errors::{display_error_and_exit, enhance_error};
use kubeapp::utils::logger;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubeapp")]
#[command(author, version, about = "Kubernetes application lifecycle manager", long_about = None)]
struct Cli {
    /// Verbose output (can be used multiple times: -v, -vv, -vvv)
    /// -v: INFO, -vv: DEBUG, -vvv: TRACE
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to .kubeapp.toml or ~/.config/kubeapp/config.toml)
    #[arg(short, long, global = true, env = "KUBEAPP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload an application tarball
    Upload {
        /// Application name
        name: String,

        /// Path to the application tarball (.tgz or .tar.gz)
        tarfile: PathBuf,
    },

    /// Apply (or re-apply) an uploaded application
    Apply {
        /// Application name
        name: String,
    },

    /// Remove an applied application from the cluster
    Remove {
        /// Application name
        name: String,
    },

    /// Delete an application and all of its files
    Delete {
        /// Application name
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List applications
    List,

    /// Show one application
    Show {
        /// Application name
        name: String,
    },

    /// Check prerequisites
    Check,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print an example configuration file
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    if let Err(e) = run(cli).await {
        display_error_and_exit(enhance_error(e));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from_file(path)?,
        None => Settings::load(),
    };

    match cli.command {
        Commands::Upload { name, tarfile } => {
            commands::app::upload(&settings, &name, &tarfile).await
        }
        Commands::Apply { name } => commands::app::apply(&settings, &name).await,
        Commands::Remove { name } => commands::app::remove(&settings, &name).await,
        Commands::Delete { name, yes } => commands::app::delete(&settings, &name, yes).await,
        Commands::List => commands::app::list(&settings).await,
        Commands::Show { name } => commands::app::show(&settings, &name).await,
        Commands::Check => commands::check::check(&settings).await,
        Commands::Config { command } => handle_config_command(command),
        Commands::Completion { shell } => handle_completion_command(shell),
        Commands::Version => handle_version_command(),
    }
}

fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Init => {
            print!("{}", Settings::example_config()?);
            Ok(())
        }
    }
}

fn handle_completion_command(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "kubeapp", &mut io::stdout());
    Ok(())
}

fn handle_version_command() -> Result<()> {
    println!("kubeapp {}", env!("CARGO_PKG_VERSION"));
    println!("Kubernetes application lifecycle manager");
    Ok(())
}
