use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod app;
mod console;
mod session_log;

use app::App;

#[derive(Parser, Debug)]
#[command(name = "free-recall", version, about = "Free-recall session runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Subject code, e.g. R1001P
    #[arg(short, long)]
    pub subject: String,

    /// Preset the configuration file is layered over
    #[arg(long, value_enum, default_value_t = Preset::Fr1)]
    pub preset: Preset,

    /// JSON file overriding preset keys
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Root of the per-subject state, logs and recordings
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Control PC address
    #[arg(long, default_value = "127.0.0.1:8889")]
    pub host: String,

    /// Run without a control PC regardless of the configuration
    #[arg(long)]
    pub no_host: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum Commands {
    /// Run the subject's next session (default)
    Run,
    /// Mark the subject's current session as skipped
    Skip,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Fr1,
    Fr3,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = App::new(&cli).and_then(|mut app| match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => app.run(),
        Commands::Skip => app.skip(),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<recall_core::Error>() {
            Some(stop) if stop.is_graceful() => {
                eprintln!("{stop}");
                ExitCode::SUCCESS
            }
            _ => {
                error!("{err:#}");
                ExitCode::FAILURE
            }
        },
    }
}
