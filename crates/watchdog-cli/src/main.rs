mod cmd;
mod logging;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gateway-watchdog",
    about = "Scheduled health check for the WhatsApp gateway: probe, restart, alert",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ~/.config/gateway-watchdog/config.yaml)
    #[arg(long, global = true, env = "WATCHDOG_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON (logs move to stderr)
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Probe, restart on failure, alert if still down (the default)
    Check,

    /// Run one probe and report; no restart, no state change
    Probe,

    /// Show alert state, gateway process and resolved binaries
    Status,

    /// Clear the alert cooldown so the next failure alerts immediately
    Reset,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.json);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let ctx = cmd::Context::load(cli.config.as_deref())?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Check => rt.block_on(cmd::check::run(&ctx, cli.json)),
        Commands::Probe => rt.block_on(cmd::probe::run(&ctx, cli.json)),
        Commands::Status => rt.block_on(cmd::status::run(&ctx, cli.json)),
        Commands::Reset => cmd::reset::run(&ctx, cli.json),
    }
}
