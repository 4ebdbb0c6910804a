mod commands;
mod utils;

use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stack")]
#[command(about = "Declarative cloud stacks, converged in dependency order", long_about = None)]
struct Cli {
    /// Plan file (default: discovered from the current directory)
    #[arg(short, long, global = true)]
    plan: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that talk to providers
#[derive(Args, Clone, Default)]
pub struct RunArgs {
    /// kubeconfig context for kubectl and helm
    #[arg(long, env = "STACKFLOW_KUBE_CONTEXT")]
    pub context: Option<String>,

    /// Only these resources and what they depend on
    #[arg(short, long = "target", value_name = "ID")]
    pub targets: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update every resource of the plan
    Deploy {
        #[command(flatten)]
        run: RunArgs,
        /// Maximum number of resources reconciled at once
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Also write the report JSON to this path
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
        /// Print secret outputs unmasked
        #[arg(long)]
        show_secrets: bool,
    },
    /// Delete every resource of the plan, dependents first
    Cleanup {
        #[command(flatten)]
        run: RunArgs,
        /// Maximum number of resources deleted at once
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Also write the report JSON to this path
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
        /// Run without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show what a deploy would change without changing anything
    Plan {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Check the plan file: syntax, references, dependency cycles
    Validate,
    /// Print version information
    Version,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログはstderrへ（stdoutはサマリー用）
    init_logging(cli.verbose);

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let document = match stackflow_config::load_plan(cli.plan) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    };

    // コマンドディスパッチ
    let exit_code = match cli.command {
        Commands::Deploy {
            run,
            concurrency,
            report,
            show_secrets,
        } => commands::deploy::handle(&document, run, concurrency, report, show_secrets).await?,
        Commands::Cleanup {
            run,
            concurrency,
            report,
            yes,
        } => commands::cleanup::handle(&document, run, concurrency, report, yes).await?,
        Commands::Plan { run } => commands::plan::handle(&document, run).await?,
        Commands::Validate => commands::validate::handle(&document),
        Commands::Version => {
            unreachable!("Version is handled before plan loading");
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
