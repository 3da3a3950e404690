use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use vsm_runtime::config::{Config, REPLAY_RATE_MAX, REPLAY_RATE_MIN};
use vsm_runtime::lifecycle::{Vsm, wait_for_signal};
use vsm_runtime::logger::LogFormat;

#[derive(Parser)]
#[command(name = "vsm", about = "Vehicle Signal Manager — rule-driven reactive signal engine")]
struct Cli {
    /// YAML ruleset configuration
    rules: PathBuf,

    /// Initial state, YAML file
    #[arg(long)]
    initial_state: Option<PathBuf>,

    /// .vsi file which maps all signal names to numbers
    #[arg(long)]
    signal_number_file: PathBuf,

    /// List of IPC modules to load (default: stdio debug transport)
    #[arg(long, num_args = 0.., value_name = "NAME")]
    ipc_modules: Vec<String>,

    /// Write signal output to this file; '-' for stdout (default: vsm.log)
    #[arg(long)]
    log_file: Option<String>,

    /// Write the log file in the specified format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Do not log condition checks (default: log them)
    #[arg(long)]
    no_log_condition_checks: bool,

    /// Use a log file to replay signal emission in real or scaled time
    #[arg(long)]
    replay_log_file: Option<PathBuf>,

    /// The rate at which to play back the replay log, as a percentage of
    /// originally-recorded timing: 20 plays back at 20% of the original
    /// rate (5x slower than 100)
    #[arg(long, default_value_t = 100.0, value_parser = parse_rate)]
    replay_rate: f64,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum LogFormatArg {
    Catapult,
}

fn parse_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw.parse().map_err(|_| format!("invalid rate '{raw}'"))?;
    if (REPLAY_RATE_MIN..=REPLAY_RATE_MAX).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!(
            "Replay rate must be between {REPLAY_RATE_MIN} and {REPLAY_RATE_MAX}, inclusive"
        ))
    }
}

#[tokio::main]
async fn main() {
    vsm_runtime::tracing_init::init_tracing();
    let cli = Cli::parse();

    let config = Config {
        rules: cli.rules,
        initial_state: cli.initial_state,
        signal_number_file: cli.signal_number_file,
        ipc_modules: cli.ipc_modules,
        log_file: cli.log_file,
        log_format: match cli.log_format {
            Some(LogFormatArg::Catapult) => LogFormat::Catapult,
            None => LogFormat::Text,
        },
        log_condition_checks: !cli.no_log_condition_checks,
        replay_log_file: cli.replay_log_file,
        replay_rate: cli.replay_rate,
    };

    if let Err(e) = run(config).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let vsm = Vsm::bootstrap(&config).await?;
    tokio::spawn(wait_for_signal(vsm.cancel_token()));
    vsm.run().await?;
    Ok(())
}
