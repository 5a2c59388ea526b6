//! channels CLI - applies addon channels to a Kubernetes cluster

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::io;
use std::path::PathBuf;

use addon_channels::commands::apply::ApplyChannelOptions;
use addon_channels::config::{ApplyStrategy, Settings};
use addon_channels::utils::{enhance_error, init_tracing};

#[derive(Parser)]
#[command(name = "channels")]
#[command(author, version, about = "Apply addon channels to a Kubernetes cluster", long_about = None)]
struct Cli {
    /// Verbose output (can be used multiple times: -v, -vv, -vvv)
    /// -v: INFO, -vv: DEBUG, -vvv: TRACE
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to kubeconfig file
    #[arg(long, global = true, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply resources to the cluster
    Apply {
        #[command(subcommand)]
        command: ApplyCommands,
    },

    /// Display resources
    Get {
        #[command(subcommand)]
        command: GetCommands,
    },

    /// Print an example configuration file
    Config,

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
enum ApplyCommands {
    /// Apply the addons of one or more channels
    Channel {
        /// Channel URLs, or well-known channel names
        channels: Vec<String>,

        /// Apply from a local file (repeatable)
        #[arg(short = 'f', long = "filename")]
        files: Vec<String>,

        /// Apply the update; without it only the plan is printed
        #[arg(long)]
        yes: bool,

        /// Field manager owning applied fields
        #[arg(long)]
        field_manager: Option<String>,

        /// How manifests are applied
        #[arg(long, value_enum)]
        strategy: Option<ApplyStrategy>,
    },
}

#[derive(Subcommand)]
enum GetCommands {
    /// List the addons installed on the cluster
    Addons,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        enhance_error(err).display();
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Apply {
            command:
                ApplyCommands::Channel {
                    channels,
                    files,
                    yes,
                    field_manager,
                    strategy,
                },
        } => {
            let options = ApplyChannelOptions {
                channels,
                files,
                yes,
                kubeconfig: cli.kubeconfig,
                field_manager,
                strategy,
            };
            addon_channels::commands::apply::run(options, Settings::load()).await
        }
        Commands::Get {
            command: GetCommands::Addons,
        } => addon_channels::commands::get::addons(cli.kubeconfig.as_deref()).await,
        Commands::Config => {
            print!("{}", Settings::example_config()?);
            Ok(())
        }
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "channels", &mut io::stdout());
            Ok(())
        }
        Commands::Version => {
            println!("channels {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
