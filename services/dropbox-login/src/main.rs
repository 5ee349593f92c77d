//! Dropbox login CLI
//!
//! Authorizes Dropbox accounts from a terminal and manages the stored
//! credentials:
//! 1. `login` prints the authorization URL and reads the redirect URL back
//!    from stdin
//! 2. Credentials are kept in a local file (owner-only permissions)
//! 3. `watch` keeps every stored token fresh until SIGINT/SIGTERM

mod cli;

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use dropbox_auth::credentials::now_millis;
use dropbox_auth::{
    AuthConfig, AuthEvent, AuthManager, CallbackSender, ChannelSurface, FileStorage,
    spawn_refresh_task,
};

use clap::Parser;

use crate::cli::{Cli, Command};

/// How often `watch` checks stored tokens.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// `watch` refreshes tokens with less than this much validity left.
const REFRESH_THRESHOLD: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config_path = AuthConfig::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = AuthConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let storage = FileStorage::load(cli.store.clone())
        .await
        .with_context(|| format!("failed to open credential file {}", cli.store.display()))?;

    let manager = AuthManager::new(config, Arc::new(storage))?;

    match cli.command {
        Command::Login => login(&manager).await,
        Command::List => list(&manager).await,
        Command::Refresh { force } => refresh(&manager, force).await,
        Command::Logout { all: true, .. } => {
            manager.remove_all().await?;
            println!("Removed all accounts");
            Ok(())
        }
        Command::Logout {
            account_id: Some(account_id),
            ..
        } => {
            let credential = manager
                .credential(&account_id)
                .await
                .with_context(|| format!("no stored account {account_id}"))?;
            manager.remove(&credential).await?;
            println!("Removed {account_id}");
            Ok(())
        }
        Command::Logout { .. } => anyhow::bail!("logout needs an account id or --all"),
        Command::Watch => watch(&manager).await,
    }
}

/// Initialize tracing on stderr with LOG_LEVEL / RUST_LOG support.
fn init_tracing(json: bool) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn login(manager: &AuthManager) -> Result<()> {
    let (surface, callbacks) = ChannelSurface::new(Box::new(|url: &Url| {
        println!("Open this URL in a browser and approve access:\n\n  {url}\n");
        println!("Then paste the URL you were redirected to:");
        true
    }));
    forward_stdin(callbacks);

    let credential = tokio::select! {
        result = manager.authorize(&surface) => result.context("authorization failed")?,
        _ = shutdown_signal() => anyhow::bail!("login interrupted"),
    };

    println!("Authorized {}", credential.account_id);
    Ok(())
}

/// Feed stdin lines to the surface from a plain thread, so a pending read
/// never holds up runtime shutdown.
fn forward_stdin(callbacks: CallbackSender) {
    let runtime = tokio::runtime::Handle::current();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !runtime.block_on(callbacks.deliver(line)) {
                break;
            }
        }
    });
}

async fn list(manager: &AuthManager) -> Result<()> {
    let credentials = manager.credentials().await?;
    if credentials.is_empty() {
        println!("No stored accounts");
        return Ok(());
    }
    for credential in &credentials {
        let team = credential.team_id.as_deref().unwrap_or("-");
        println!(
            "{}\tteam={}\t{}",
            credential.account_id,
            team,
            describe_expiry(credential.expires_at, now_millis())
        );
    }
    Ok(())
}

async fn refresh(manager: &AuthManager, force: bool) -> Result<()> {
    let mut failed = 0;
    for credential in manager.credentials().await? {
        match credential.refresh(force).await {
            Ok(refreshed) => println!(
                "{}\t{}",
                refreshed.account_id,
                describe_expiry(refreshed.expires_at, now_millis())
            ),
            Err(e) => {
                failed += 1;
                eprintln!("{}\trefresh failed: {e}", credential.account_id);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} account(s) failed to refresh");
    }
    Ok(())
}

async fn watch(manager: &AuthManager) -> Result<()> {
    let mut events = manager.subscribe();
    let task = spawn_refresh_task(manager.store().clone(), REFRESH_INTERVAL, REFRESH_THRESHOLD);
    info!(
        interval_secs = REFRESH_INTERVAL.as_secs(),
        threshold_secs = REFRESH_THRESHOLD.as_secs(),
        "watching stored credentials"
    );

    let log_events = async {
        loop {
            match events.recv().await {
                Ok(AuthEvent::Refreshed(credential)) => {
                    info!(account_id = %credential.account_id, "credential refreshed");
                }
                Ok(AuthEvent::Added(credential)) => {
                    info!(account_id = %credential.account_id, "credential added");
                }
                Ok(AuthEvent::Removed { account_id }) => {
                    info!(account_id = %account_id, "credential removed");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth event subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = log_events => {}
    }
    task.abort();
    info!("watch stopped");
    Ok(())
}

/// Human-readable time to expiry.
fn describe_expiry(expires_at: u64, now: u64) -> String {
    if expires_at <= now {
        return "expired".into();
    }
    let secs = (expires_at - now) / 1000;
    match secs {
        0..60 => format!("expires in {secs}s"),
        60..3600 => format!("expires in {}m", secs / 60),
        _ => format!("expires in {}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
