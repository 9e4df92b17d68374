/*!
 * vicctl - Transformation Controller
 *
 * Drives the prepare/start exchange with a process's transformation engine.
 * The OS-level action itself (checkpoint/restore, killing a child) happens
 * between the two commands and is left to the caller.
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use vic_runtime::{init_tracing, ControlClient, Direction, OsPid, RuntimeConfig};

#[derive(Parser)]
#[command(name = "vicctl")]
#[command(about = "Controller for thread/process context transformations.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask the engine of a process to prepare a pass and print its reply
    Prepare {
        #[arg(long)]
        pid: OsPid,
        /// Force a direction instead of letting the engine choose
        #[arg(long, value_parser = parse_direction)]
        direction: Option<Direction>,
        /// Stack size in bytes for merge placeholder threads
        #[arg(long)]
        stack_size: Option<usize>,
        /// Print the reply as JSON
        #[arg(long)]
        json: bool,
    },
    /// Tell the engine of a process that the OS action is done
    Start {
        #[arg(long)]
        pid: OsPid,
        /// New process ids, in the order of the ready list
        #[arg(long, num_args = 0.., value_delimiter = ',')]
        pids: Vec<OsPid>,
    },
}

fn parse_direction(s: &str) -> Result<Direction, String> {
    s.parse::<Direction>().map_err(|e| e.to_string())
}

fn main() -> std::process::ExitCode {
    init_tracing();
    match try_main() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("vicctl: {:#}", e);
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let config = RuntimeConfig::from_env();

    match cli.command {
        Command::Prepare {
            pid,
            direction,
            stack_size,
            json,
        } => {
            let mut client = ControlClient::connect(&config, pid)
                .with_context(|| format!("connect to engine of pid {}", pid))?;
            if let Some(bytes) = stack_size {
                client = client.with_stack_size(bytes);
            }
            let ready = client.prepare(direction).context("prepare")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ready)?);
            } else {
                print!("{}", ready.encode());
            }
        }
        Command::Start { pid, pids } => {
            let mut client = ControlClient::connect(&config, pid)
                .with_context(|| format!("connect to engine of pid {}", pid))?;
            client.start(&pids).context("start")?;
            info!(pid, "Pass started");
        }
    }
    Ok(())
}
