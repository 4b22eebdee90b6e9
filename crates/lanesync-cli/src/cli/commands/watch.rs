//! Live status view driven by the poll engine.
//!
//! Prints one line per published state and reads simple commands from stdin:
//! `p` pause, `r` resume, `i <ms>` change interval, `q` quit.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use lanesync_core::config::{Config, PollInterval};
use lanesync_core::credential::TokenStore;
use lanesync_core::fetcher::HttpFetcher;
use lanesync_core::publisher::PublishedState;
use lanesync_core::scheduler::{PollHandle, Poller};
use lanesync_core::snapshot::Lane;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::Interrupted;

pub const SESSION_EXPIRED: &str = "Session expired, please login again.";

pub struct WatchOptions<'a> {
    pub base_url: &'a str,
    pub config: &'a Config,
    pub interval: Option<Duration>,
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchCommand {
    Pause,
    Resume,
    Interval(Duration),
    Quit,
}

impl WatchCommand {
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return Ok(None);
        };
        let command = match head {
            "p" | "pause" => WatchCommand::Pause,
            "r" | "resume" => WatchCommand::Resume,
            "q" | "quit" => WatchCommand::Quit,
            "i" | "interval" => {
                let ms = parts
                    .next()
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|ms| *ms > 0)
                    .ok_or_else(|| "usage: i <milliseconds>".to_string())?;
                WatchCommand::Interval(Duration::from_millis(ms))
            }
            other => return Err(format!("unknown command '{other}' (p, r, i <ms>, q)")),
        };
        Ok(Some(command))
    }
}

pub async fn run(opts: WatchOptions<'_>) -> Result<()> {
    let store = TokenStore::default_location();
    let fetcher = HttpFetcher::new(opts.base_url, opts.config.request_timeout())?;
    let interval = opts.interval.unwrap_or_else(|| opts.config.interval());

    let handle = Poller::new(fetcher, store.clone(), interval)?.start();
    let outcome = drive(&handle, &store, opts.json).await;
    handle.shutdown().await;
    outcome
}

async fn drive(handle: &PollHandle, store: &TokenStore, json: bool) -> Result<()> {
    let mut states = handle.subscribe();
    // The first poll may have settled before we subscribed.
    states.mark_changed();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                handle.stop();
                return Err(Interrupted.into());
            }

            changed = states.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let Some(state) = states.borrow_and_update().clone() else {
                    continue;
                };
                print_state(&state, json)?;
                if state.is_unauthenticated() {
                    handle.stop();
                    if let Err(err) = store.clear() {
                        tracing::warn!("failed to clear session: {err:#}");
                    }
                    eprintln!("{SESSION_EXPIRED}");
                    return Ok(());
                }
            }

            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match WatchCommand::parse(&line) {
                    Ok(Some(WatchCommand::Quit)) => return Ok(()),
                    Ok(Some(command)) => apply(handle, command),
                    Ok(None) => {}
                    Err(msg) => eprintln!("{msg}"),
                },
                Ok(None) => stdin_open = false,
                Err(err) => {
                    tracing::warn!("stdin closed: {err}");
                    stdin_open = false;
                }
            },
        }
    }
}

fn apply(handle: &PollHandle, command: WatchCommand) {
    match command {
        WatchCommand::Pause => {
            handle.pause();
            eprintln!("Paused.");
        }
        WatchCommand::Resume => {
            handle.resume();
            eprintln!("Resumed.");
        }
        WatchCommand::Interval(interval) => match handle.set_interval(interval) {
            Ok(()) => eprintln!("Interval set to {}.", interval_label(interval)),
            Err(err) => eprintln!("{err:#}"),
        },
        WatchCommand::Quit => handle.stop(),
    }
}

/// Named cadences print as `1s`; anything else as milliseconds.
fn interval_label(interval: Duration) -> String {
    let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    PollInterval::from_millis(ms).map_or_else(|| format!("{ms}ms"), |named| named.label().to_string())
}

fn print_state(state: &PublishedState, json: bool) -> Result<()> {
    let line = if json {
        serde_json::to_string(state).context("serialize state")?
    } else {
        format_state(state)
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}").context("write to stdout")?;
    stdout.flush().context("flush stdout")
}

fn format_state(state: &PublishedState) -> String {
    let (snapshot, history) = match state {
        PublishedState::Live { snapshot, history } => (snapshot, history),
        PublishedState::Failed { kind, detail } => return format!("error ({kind}): {detail}"),
    };

    let lanes = Lane::ALL
        .iter()
        .map(|&lane| format!("{lane}: {:>3}", snapshot.count(lane)))
        .collect::<Vec<_>>()
        .join(" | ");
    let time = snapshot
        .observed_at()
        .map_or_else(|| "--:--:--".to_string(), |t| t.format("%H:%M:%S").to_string());
    let emergency = match (snapshot.emergency(), snapshot.emergency_lane()) {
        (true, Some(lane)) => format!("on ({lane})"),
        (true, None) => "on".to_string(),
        (false, _) => "off".to_string(),
    };

    let samples = history
        .lanes()
        .map(|(_, points)| points.len().to_string())
        .collect::<Vec<_>>()
        .join("/");
    let trend = Lane::ALL
        .iter()
        .map(|&lane| match history.trend(lane) {
            None => "-".to_string(),
            Some(0) => "0".to_string(),
            Some(delta) => format!("{delta:+}"),
        })
        .collect::<Vec<_>>()
        .join("/");

    let mut line = format!(
        "{time}  {lanes}  green={} ({}s)  mode={}  emergency={emergency}  samples={samples}  trend={trend}",
        snapshot.active_lane(),
        snapshot.active_lane_timer(),
        snapshot.mode(),
    );
    if let Some(marker) = snapshot.backend_error() {
        line.push_str(&format!("  [{marker}]"));
    }
    line
}
