mod http;

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use irrigation_timers::codec::encode_duration;
use irrigation_timers::{Interval, SyncedTimers, Timer, TimerId, TimerInput};
use tracing_subscriber::EnvFilter;

use http::{HttpGateway, DEFAULT_API};

#[derive(Parser, Debug)]
#[command(name = "irrigation", version, about = "Manage the watering timers on an irrigation hub")]
struct Args {
    /// Base URL of the hub API.
    #[arg(long, env = "IRRIGATION_API", default_value = DEFAULT_API)]
    api: String,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Show every timer.
    List,
    /// Show the merged watering intervals.
    Intervals {
        /// Also fetch the hub's own derivation and compare.
        #[arg(long)]
        remote: bool,
    },
    /// Add a timer.
    Add {
        #[arg(long)]
        name: String,
        /// HH:MM or HH:MM:SS
        #[arg(long)]
        start: String,
        /// MM:SS or HH:MM:SS
        #[arg(long)]
        duration: String,
    },
    /// Change fields of an existing timer.
    Edit {
        id: TimerId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        duration: Option<String>,
    },
    /// Remove a timer.
    Remove {
        id: TimerId,
        /// Skip the confirmation prompt and never offer a retry.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Notices are printed directly, so keep library logging quiet by default.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        )
        .init();

    let args = Args::parse();
    let gateway = HttpGateway::new(&args.api, Duration::from_secs(args.timeout))
        .context("failed to build http client")?;
    let synced = SyncedTimers::new(gateway);

    let ok = run(&synced, args.command).await?;
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Execute one command. `Ok(false)` means the hub refused or could not be
/// reached; the reason has already been printed.
async fn run(synced: &SyncedTimers<HttpGateway>, command: Command) -> Result<bool> {
    if synced.refresh().await.is_err() {
        print_notices(synced).await;
        return Ok(false);
    }

    match command {
        Command::List => {
            let timers = synced.timers().await;
            if timers.is_empty() {
                println!("no timers");
            }
            for timer in &timers {
                println!("{}", timer_row(timer));
            }
            Ok(true)
        }

        Command::Intervals { remote } => {
            let local = synced.intervals().await;
            print_intervals(&local);
            if !remote {
                return Ok(true);
            }
            match synced.authority_intervals().await {
                Ok(theirs) if theirs == local => Ok(true),
                Ok(theirs) => {
                    eprintln!("warning: the hub derives different intervals:");
                    for iv in &theirs {
                        eprintln!("  {iv}");
                    }
                    Ok(true)
                }
                Err(failure) => {
                    eprintln!("{failure}");
                    Ok(false)
                }
            }
        }

        Command::Add {
            name,
            start,
            duration,
        } => {
            let input = TimerInput {
                id: None,
                name,
                start_time: start,
                duration,
            };
            let timer = match input.validate() {
                Ok(timer) => timer,
                Err(e) => {
                    eprintln!("invalid timer: {e}");
                    return Ok(false);
                }
            };

            let before: BTreeSet<TimerId> =
                synced.timers().await.iter().filter_map(|t| t.id).collect();
            if !synced.submit(timer).await? {
                print_notices(synced).await;
                return Ok(false);
            }
            for timer in synced.timers().await {
                if timer.id.is_some_and(|id| !before.contains(&id)) {
                    println!("added {}", timer_row(&timer));
                }
            }
            Ok(true)
        }

        Command::Edit {
            id,
            name,
            start,
            duration,
        } => {
            let Some(existing) = synced.store().lock().await.get(id).cloned() else {
                eprintln!("no timer with id {id}");
                return Ok(false);
            };
            let timer = match edit_input(&existing, name, start, duration).validate() {
                Ok(timer) => timer,
                Err(e) => {
                    eprintln!("invalid timer: {e}");
                    return Ok(false);
                }
            };

            if !synced.submit(timer).await? {
                print_notices(synced).await;
                return Ok(false);
            }
            if let Some(updated) = synced.store().lock().await.get(id) {
                println!("updated {}", timer_row(updated));
            }
            Ok(true)
        }

        Command::Remove { id, yes } => remove(synced, id, yes).await,
    }
}

async fn remove(synced: &SyncedTimers<HttpGateway>, id: TimerId, yes: bool) -> Result<bool> {
    let Some(existing) = synced.store().lock().await.get(id).cloned() else {
        eprintln!("no timer with id {id}");
        return Ok(false);
    };

    synced.request_removal(id).await?;
    if !yes && !ask(format!("remove {}?", timer_row(&existing))).await? {
        synced.cancel_removal(id).await?;
        println!("cancelled");
        return Ok(true);
    }

    loop {
        if synced.confirm_removal(id).await? {
            println!("removed timer {id}");
            return Ok(true);
        }
        print_notices(synced).await;
        if yes || !ask("retry?".to_string()).await? {
            synced.cancel_removal(id).await?;
            return Ok(false);
        }
    }
}

/// Merge the changed fields over the current timer.
fn edit_input(
    existing: &Timer,
    name: Option<String>,
    start: Option<String>,
    duration: Option<String>,
) -> TimerInput {
    TimerInput {
        id: existing.id,
        name: name.unwrap_or_else(|| existing.name.clone()),
        start_time: start.unwrap_or_else(|| existing.start_time.to_string()),
        duration: duration.unwrap_or_else(|| {
            encode_duration(i64::from(existing.duration)).unwrap_or_default()
        }),
    }
}

fn timer_row(timer: &Timer) -> String {
    let id = timer.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let duration = encode_duration(i64::from(timer.duration))
        .unwrap_or_else(|_| format!("{}s", timer.duration));
    format!(
        "#{id:<4} {}  for {duration:>8}  {}",
        timer.start_time, timer.name
    )
}

fn print_intervals(intervals: &[Interval]) {
    if intervals.is_empty() {
        println!("no watering");
    }
    for iv in intervals {
        if iv.is_full_day() {
            println!("{iv}  (all day)");
        } else {
            println!("{iv}");
        }
    }
}

async fn print_notices(synced: &SyncedTimers<HttpGateway>) {
    for notice in synced.store().lock().await.take_notices() {
        eprintln!("{}", notice.reason);
    }
}

/// Yes/no prompt on the terminal; anything but `y`/`yes` is no.
async fn ask(question: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || -> io::Result<bool> {
        let mut stdout = io::stdout();
        write!(stdout, "{question} [y/N] ")?;
        stdout.flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(is_yes(&line))
    })
    .await
    .context("prompt task failed")?
    .context("failed to read answer")
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

// ===========================================================================
// Tests
// ===========================================================================
