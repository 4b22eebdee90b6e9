//! One-shot control commands against an authenticated session.

use anyhow::{Result, anyhow, bail};
use chrono::DateTime;
use lanesync_core::actions::{ActionError, ActionErrorKind, ControlClient};
use lanesync_core::config::Config;
use lanesync_core::credential::{Role, TokenStore};
use lanesync_core::snapshot::Lane;

pub type Client = ControlClient<TokenStore>;

pub fn client(base_url: &str, config: &Config) -> Result<Client> {
    ControlClient::new(base_url, config.request_timeout(), TokenStore::default_location())
}

/// Adds a hint for errors the user can fix themselves.
fn explain(err: ActionError) -> anyhow::Error {
    match err.kind {
        ActionErrorKind::Unauthenticated => {
            anyhow!("{err} (not logged in or session expired; run `lanesync login`)")
        }
        ActionErrorKind::Forbidden => anyhow!("{err} (requires an official account)"),
        ActionErrorKind::Rejected | ActionErrorKind::Transient => anyhow::Error::new(err),
    }
}

/// Fails fast when the stored session belongs to a regular user. Without a
/// stored role the backend decides.
fn require_official(client: &Client) -> Result<()> {
    if client.credentials().role() == Some(Role::User) {
        bail!("logged in as a regular user; this command requires an official account");
    }
    Ok(())
}

fn format_ts(ts: f64) -> String {
    DateTime::from_timestamp(ts.trunc() as i64, 0)
        .map_or_else(|| format!("{ts:.0}"), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

pub async fn emergency(client: &Client, on: bool, lane: Option<Lane>) -> Result<()> {
    let ack = client.set_emergency(on, lane).await.map_err(explain)?;
    match (on, ack.lane) {
        (true, Some(lane)) => println!("Emergency on: {lane} has priority."),
        (true, None) => println!("Emergency on."),
        (false, _) => println!("Emergency off."),
    }
    Ok(())
}

pub async fn set_mode(client: &Client, mock: bool) -> Result<()> {
    let ack = client.set_mode(mock).await.map_err(explain)?;
    println!("Detection source is now {}.", ack.mode());
    Ok(())
}

pub async fn pedestrian(client: &Client, lane: Lane) -> Result<()> {
    let ack = client.request_pedestrian(lane).await.map_err(explain)?;
    println!("Pedestrian crossing requested for {}.", ack.lane);
    Ok(())
}

pub async fn takeover(client: &Client, lane: Lane, duration_secs: u32) -> Result<()> {
    require_official(client)?;
    let ack = client.takeover(lane, duration_secs).await.map_err(explain)?;
    println!("{} held green for {}s.", ack.lane, ack.duration);
    Ok(())
}

pub async fn release(client: &Client) -> Result<()> {
    require_official(client)?;
    client.release().await.map_err(explain)?;
    println!("Returned to automatic control.");
    Ok(())
}

pub async fn train(client: &Client, iters: u32) -> Result<()> {
    require_official(client)?;
    let report = client.train_rl(iters).await.map_err(explain)?;
    println!(
        "Training {}: {} iterations, replay buffer {}.",
        report.status, report.iters, report.buffer_size
    );
    Ok(())
}

pub async fn stats(client: &Client) -> Result<()> {
    require_official(client)?;
    match client.agent_stats().await.map_err(explain)? {
        Some(stats) => println!(
            "Exploration rate {:.3}, replay buffer {}.",
            stats.eps, stats.buffer_len
        ),
        None => println!("No learning agent loaded."),
    }
    Ok(())
}

pub async fn alerts(client: &Client) -> Result<()> {
    require_official(client)?;
    let alerts = client.alerts().await.map_err(explain)?;
    if alerts.is_empty() {
        println!("No alerts.");
    }
    for alert in alerts {
        let status = if alert.ack { "acked" } else { "open" };
        println!("{}  {}  [{status}]  {}", format_ts(alert.ts), alert.lane, alert.msg);
    }
    Ok(())
}

pub async fn ack_alert(client: &Client, lane: Lane) -> Result<()> {
    require_official(client)?;
    client.ack_alert(lane).await.map_err(explain)?;
    println!("Alerts for {lane} acknowledged.");
    Ok(())
}

pub async fn override_log(client: &Client) -> Result<()> {
    require_official(client)?;
    let records = client.override_log().await.map_err(explain)?;
    if records.is_empty() {
        println!("No overrides recorded.");
    }
    for record in records {
        println!(
            "{}  {}  {}  {}s  {}",
            format_ts(record.ts),
            record.user,
            record.lane,
            record.duration,
            record.reason
        );
    }
    Ok(())
}

pub async fn predict(client: &Client, lane: Lane) -> Result<()> {
    require_official(client)?;
    let prediction = client.prediction(lane).await.map_err(explain)?;
    println!(
        "{lane}: expected {:.1} vehicles (sigma {:.2}) over the next hour.",
        prediction.mu, prediction.sigma
    );
    Ok(())
}
