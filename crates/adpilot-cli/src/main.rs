mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    automation::AutomationSubcommand, backfill::BackfillSubcommand, config::ConfigSubcommand,
    job::JobSubcommand, schedule::ScheduleSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "adpilot",
    about = "Rate-governed ads sync scheduler and automation governor",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: nearest directory containing .adpilot/)
    #[arg(long, global = true, env = "ADPILOT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .adpilot/ with a default config and database
    Init,

    /// Create, run, cancel and list sync jobs
    Job {
        #[command(subcommand)]
        subcommand: JobSubcommand,
    },

    /// Show the outbound API budget
    RateLimit,

    /// Manage recurring sync schedules
    Schedule {
        #[command(subcommand)]
        subcommand: ScheduleSubcommand,
    },

    /// Historical backfill for an account
    Backfill {
        #[command(subcommand)]
        subcommand: BackfillSubcommand,
    },

    /// Automation governor: config, cycles, stop/resume, approvals, ledger
    Automation {
        #[command(subcommand)]
        subcommand: AutomationSubcommand,
    },

    /// Run the scheduler loop (or a single tick with --once)
    Daemon {
        #[arg(long)]
        once: bool,
    },

    /// Serve the JSON API and run the scheduler loop
    Serve {
        /// Port to listen on (0 = OS-assigned)
        #[arg(long, default_value = "7420")]
        port: u16,

        /// Do not run the scheduler loop alongside the server
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Inspect and validate .adpilot/config.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Daemon { .. } | Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Job { subcommand } => cmd::job::run(&root, subcommand, cli.json),
        Commands::RateLimit => cmd::rate_limit::run(&root, cli.json),
        Commands::Schedule { subcommand } => cmd::schedule::run(&root, subcommand, cli.json),
        Commands::Backfill { subcommand } => cmd::backfill::run(&root, subcommand, cli.json),
        Commands::Automation { subcommand } => {
            cmd::automation::run(&root, subcommand, cli.json)
        }
        Commands::Daemon { once } => cmd::daemon::run(&root, once, cli.json),
        Commands::Serve { port, no_scheduler } => cmd::serve::run(&root, port, !no_scheduler),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
