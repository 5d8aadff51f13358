use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tcp_audit_agent::{processor, run_agent, AgentConfig};

#[derive(Debug, Parser)]
#[command(name = "tcp-audit")]
#[command(version)]
#[command(about = "Audit TCP socket state transitions via the kernel tracing filesystem")]
struct Cli {
    /// Path to the eventer plugin
    #[arg(long = "event", value_name = "PATH")]
    event: PathBuf,

    /// Path to the sinker plugin
    #[arg(long = "sink", value_name = "PATH")]
    sink: PathBuf,

    /// Give up after this many back-to-back event or sink errors
    #[arg(
        long = "max-event-errors",
        value_name = "N",
        default_value_t = processor::DEFAULT_MAX_CONSECUTIVE_ERRORS
    )]
    max_event_errors: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    let status = run_agent(AgentConfig {
        eventer_plugin: cli.event,
        sinker_plugin: cli.sink,
        max_consecutive_errors: cli.max_event_errors,
    })
    .await;

    ExitCode::from(status.code())
}
