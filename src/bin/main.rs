use clap::{Parser, Subcommand};
use std::path::PathBuf;
use workbridge::config::SettingsEvent;
use workbridge::{AppContext, WorkbridgeSettings, load_settings};

/// Supervisor for an external worker process: prioritized job queue,
/// health-checked bridge, and state reconciliation
#[derive(Parser)]
#[command(name = "workbridge")]
#[command(version)]
#[command(about = "Supervise a worker process with a prioritized queue and state reconciliation")]
struct Cli {
    /// Settings file layered over the user config
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker and reconcile the configured entities until Ctrl-C
    Run,
    /// Start the worker, send one health probe, and print the health status
    Probe,
    /// Print the effective settings as TOML
    Config,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let outcome = load_settings(cli.config.as_deref());
    outcome.events.iter().for_each(SettingsEvent::log);
    let settings = outcome.settings;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(settings).await,
        Commands::Probe => probe(settings).await,
        Commands::Config => match toml::to_string_pretty(&settings) {
            Ok(rendered) => print!("{}", rendered),
            Err(e) => {
                eprintln!("Error: failed to render settings: {}", e);
                std::process::exit(1);
            }
        },
    }
}

async fn run(settings: WorkbridgeSettings) {
    let context = AppContext::new(settings);
    if let Err(e) = context.start().await {
        eprintln!("Warning: worker did not start: {}", e);
        eprintln!("Recovery will keep retrying in the background.");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Error: failed to listen for Ctrl-C: {}", e);
    }
    eprintln!("Shutting down...");
    context.shutdown().await;
}

async fn probe(settings: WorkbridgeSettings) {
    let context = AppContext::new(settings);
    let bridge = context.bridge();
    let exit_code = match bridge.initialize().await {
        Ok(()) => {
            let outcome = bridge.check_health().await;
            eprintln!("Health check: {:?}", outcome);
            match serde_json::to_string_pretty(&bridge.health_status()) {
                Ok(status) => {
                    println!("{}", status);
                    if bridge.is_healthy() { 0 } else { 2 }
                }
                Err(e) => {
                    eprintln!("Error: failed to render health status: {}", e);
                    1
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    context.shutdown().await;
    std::process::exit(exit_code);
}
