mod launcher;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use qcx_core::{events, Config, Session, Workspace, ROOT_ID};

use crate::launcher::TerminalLauncher;
use crate::report::{outline, Reporter};

#[derive(Parser)]
#[command(name = "qcx")]
#[command(about = "Discover, run and debug QCumber/RSpec test suites", long_about = None)]
struct Cli {
    /// Workspace folder (defaults to the current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Show the framework's error output when discovery fails
    #[arg(long, global = true)]
    view_error: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover tests and print the tree
    List {
        /// Print the tree as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run suites or tests by identity (everything when none are given)
    Run { ids: Vec<String> },
    /// Run suites or tests under the remote debugger
    Debug { ids: Vec<String> },
    /// Print the effective configuration
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().wrap_err("Cannot determine the current directory")?,
    };
    let config = Config::load(&root).wrap_err("Failed to load configuration")?;

    match cli.command {
        Commands::Config { default } => {
            if default {
                print!("{}", Config::default_config_string());
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::List { json } => list(config, root, json, cli.view_error).await,
        Commands::Run { ids } => run(config, root, ids, false, cli.view_error).await,
        Commands::Debug { ids } => run(config, root, ids, true, cli.view_error).await,
    }
}

/// Logs go to stderr so they never mix with listings on stdout.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

async fn list(
    config: Config,
    root: PathBuf,
    json: bool,
    view_error: bool,
) -> color_eyre::Result<ExitCode> {
    let (tx, rx) = events::channel();
    let reporter = tokio::spawn(Reporter::new(view_error).run(rx));

    let mut session = Session::new(config, Workspace::new(root), tx);
    let loaded = session.load().await;
    drop(session);
    reporter.await?;

    let tree = loaded?;
    if json {
        println!("{}", serde_json::to_string_pretty(tree.as_ref())?);
    } else {
        print!("{}", outline(&tree));
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(
    config: Config,
    root: PathBuf,
    mut ids: Vec<String>,
    debug: bool,
    view_error: bool,
) -> color_eyre::Result<ExitCode> {
    if ids.is_empty() {
        ids.push(ROOT_ID.to_string());
    }

    let (tx, rx) = events::channel();
    let reporter = tokio::spawn(Reporter::new(view_error).run(rx));
    let mut session = Session::new(config, Workspace::new(root), tx);

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling the test run");
            cancel.cancel();
        }
    });

    let result = if debug {
        session.debug(&ids, &TerminalLauncher).await
    } else {
        session.run(&ids, None).await
    };
    drop(session);
    let summary = reporter.await?;
    result?;

    println!(
        "{} passed, {} failed, {} skipped",
        summary.passed, summary.failed, summary.skipped
    );
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
