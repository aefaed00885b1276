//! `stockdesk` command-line entry point.
//!
//! Bootstraps the persisted session, runs one command, prints JSON to stdout.

use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::json;

use stockdesk_session::{
    Credentials, HttpGateway, SessionConfig, SessionManager, SqliteStore,
};

const ENV_SECRET: &str = "STOCKDESK_SECRET";

const USAGE: &str = "usage: stockdesk <login <identifier> | logout | whoami | refresh | check <permission>...>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockdesk_observability::init();

    let config = SessionConfig::from_env()?;
    let graph = config.load_permission_graph()?;

    let gateway = HttpGateway::new(config.api_url.clone(), config.http_timeout)
        .context("failed to build HTTP client")?;
    let store = match &config.store_path {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::default_location()?,
    };

    tracing::info!(api_url = %gateway.api_url(), "starting stockdesk session");

    let manager = SessionManager::new(Arc::new(gateway), Arc::new(store))
        .with_graph(Arc::new(graph))
        .with_unreachable_policy(config.unreachable_policy);
    manager.bootstrap().await?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let output = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["login", identifier] => {
            let secret = std::env::var(ENV_SECRET)
                .with_context(|| format!("{ENV_SECRET} must hold the secret for login"))?;
            let user = manager.login(Credentials::new(*identifier, secret)).await?;
            json!({ "signed_in": user })
        }
        ["logout"] => {
            manager.logout().await;
            json!({ "signed_out": true })
        }
        ["whoami"] => serde_json::to_value(manager.snapshot())?,
        ["refresh"] => {
            let user = manager.refresh().await?;
            json!({ "refreshed": user })
        }
        ["check", permissions @ ..] if !permissions.is_empty() => {
            let snapshot = manager.snapshot();
            let user = snapshot.user.as_ref();
            let results: Vec<_> = permissions
                .iter()
                .map(|p| stockdesk_auth::explain(user, p, manager.permission_graph()))
                .collect();
            serde_json::to_value(results)?
        }
        _ => bail!(USAGE),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
