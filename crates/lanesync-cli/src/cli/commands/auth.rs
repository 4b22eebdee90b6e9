//! Login, signup and logout.

use anyhow::{Context, Result};
use lanesync_core::actions::ControlClient;
use lanesync_core::config::Config;
use lanesync_core::credential::TokenStore;

fn anonymous_client(base_url: &str, config: &Config) -> Result<ControlClient<Option<String>>> {
    ControlClient::new(base_url, config.request_timeout(), None)
}

pub async fn login(base_url: &str, config: &Config, username: &str, password: &str) -> Result<()> {
    let session = anonymous_client(base_url, config)?
        .login(username, password)
        .await
        .context("login failed")?;

    let store = TokenStore::default_location();
    store.save(&session)?;
    tracing::info!(role = %session.role, "session stored");
    println!("Logged in as {username} ({})", session.role);
    Ok(())
}

pub async fn signup(base_url: &str, config: &Config, username: &str, password: &str) -> Result<()> {
    anonymous_client(base_url, config)?
        .signup(username, password)
        .await
        .context("signup failed")?;
    println!("Created account {username}. Run `lanesync login` to sign in.");
    Ok(())
}

pub fn logout() -> Result<()> {
    let store = TokenStore::default_location();
    if store.clear()? {
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}
