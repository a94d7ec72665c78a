mod client;
mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    audit::AuditSubcommand, policy::PolicySubcommand, submit::SubmitArgs,
    tickets::TicketsSubcommand,
};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "careguard",
    about = "Governance gate for healthcare agents: risk tiers, human approval, audit trail",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .careguard/)
    #[arg(long, global = true, env = "CAREGUARD_ROOT")]
    root: Option<PathBuf>,

    /// Server URL for client commands (default: localhost on the configured port)
    #[arg(long, global = true, env = "CAREGUARD_SERVER")]
    server: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize careguard in the current directory
    Init {
        /// Site name recorded in config.yaml (default: directory name)
        #[arg(long)]
        site: Option<String>,
    },

    /// Run the governance server and expiry sweeper
    Serve {
        /// Port to listen on (default: server.port from config.yaml)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Inspect and validate policies offline
    Policy {
        #[command(subcommand)]
        subcommand: PolicySubcommand,
    },

    /// Submit a proposed action to a running server
    Submit(SubmitArgs),

    /// Show the disposition of a submitted action
    Status {
        action_id: Uuid,
        /// Include the action's audit entries
        #[arg(long)]
        history: bool,
    },

    /// Review approval tickets
    Tickets {
        #[command(subcommand)]
        subcommand: TicketsSubcommand,
    },

    /// Query the audit trail
    Audit {
        #[command(subcommand)]
        subcommand: AuditSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let server = cli.server.as_deref();

    let result = match cli.command {
        Commands::Init { site } => cmd::init::run(&root, site.as_deref()),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Policy { subcommand } => cmd::policy::run(&root, subcommand, cli.json),
        Commands::Submit(args) => cmd::submit::run(&root, server, args, cli.json),
        Commands::Status {
            action_id,
            history,
        } => cmd::status::run(&root, server, action_id, history, cli.json),
        Commands::Tickets { subcommand } => cmd::tickets::run(&root, server, subcommand, cli.json),
        Commands::Audit { subcommand } => cmd::audit::run(&root, server, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
