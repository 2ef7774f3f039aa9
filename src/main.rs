//! Andamio CLI: declarative resource graphs, provisioned in dependency order.

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "andamio",
    version,
    about = "Declarative resource graphs, provisioned in dependency order"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: andamio::cli::Commands,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "andamio=info",
        1 => "andamio=debug",
        _ => "andamio=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let andamio::cli::Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "andamio", &mut std::io::stdout());
        return;
    }

    if let Err(e) = andamio::cli::dispatch(cli.command) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
