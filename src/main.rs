use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sdb::{History, Pid, RunState, Tracee};

/// Interactive process-control debugger.
#[derive(Debug, Parser)]
#[command(name = "sdb", version, about)]
struct Cli {
    /// Attach to a running process instead of launching one.
    #[arg(short = 'p', long = "pid", value_name = "PID", conflicts_with = "program")]
    pid: Option<i32>,

    /// Program to launch under trace.
    #[arg(value_name = "PROGRAM")]
    program: Option<PathBuf>,
}

/// Route log output to stderr, away from the prompt. Enabled via `RUST_LOG`.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let mut tracee = match (cli.pid, cli.program.as_deref()) {
        (Some(raw), None) => {
            if raw <= 0 {
                bail!("invalid PID: {raw}");
            }

            let tracee = Tracee::attach(Pid::from_raw(raw))?;
            println!("Attached to PID {raw}");

            tracee
        }
        (None, Some(program)) => {
            let tracee = Tracee::launch(program)?;
            if let Some(pid) = tracee.pid() {
                println!("Launched PID {pid}");
            }

            tracee
        }
        _ => bail!("expected a program to launch or -p <PID>"),
    };

    let mut history = History::new();
    command_loop(&mut history)?;

    drain(&mut tracee);

    tracee.teardown();

    Ok(())
}

/// Prompt until EOF. Non-blank input is recorded and echoed; blank input
/// recalls the most recent command.
fn command_loop(history: &mut History) -> io::Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("sdb> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let input = line.trim_end_matches('\n');

        if input.is_empty() {
            match history.last() {
                Some(last) => println!("{last}"),
                None => println!(),
            }
        } else {
            history.append(input);
            println!("{input}");
        }
    }

    Ok(())
}

/// Let the tracee run to completion, resuming through any further stops.
fn drain(tracee: &mut Tracee) {
    loop {
        let reason = tracee.wait();

        match reason.state {
            RunState::Running => continue,
            RunState::Stopped => {
                if let Some(pid) = tracee.pid() {
                    println!("Process {pid} {reason}, resuming");
                }

                if let Err(err) = tracee.resume() {
                    eprintln!("Failed to resume process: {err}");
                    break;
                }
            }
            RunState::Exited | RunState::Terminated => {
                if let Some(pid) = tracee.pid() {
                    println!("Process {pid} {reason}");
                }

                break;
            }
        }
    }
}
