//! tether entry point.
//!
//! Loads the configuration, assembles the command registry and serves
//! WebSocket shell sessions until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};

use tether_net::Server;
use tether_terminal::translate::ProcessTranslator;
use tether_terminal::{CommandRegistry, SessionManager, Shell, register_builtins};
use tether_types::config::TetherConfig;

fn load_config() -> Result<TetherConfig> {
    // Config path from CLI arg, then TETHER_CONFIG, else defaults.
    match std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TETHER_CONFIG").ok())
    {
        Some(path) => {
            TetherConfig::load(&path).with_context(|| format!("loading config {path}"))
        },
        None => Ok(TetherConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    let process_timeout = config.shell.process_timeout();

    let mut registry = CommandRegistry::new();
    register_builtins(&mut registry, process_timeout);
    log::info!("{} commands registered", registry.names().len());

    let vocabulary = Shell::vocabulary(&registry);
    let mut shell = Shell::new(registry, &config.shell);
    if let Some(translator) =
        ProcessTranslator::from_config(&config.translator, process_timeout, vocabulary)
    {
        log::info!("natural-language fallback enabled");
        shell = shell.with_translator(Box::new(translator));
    }

    let cwd = std::env::current_dir().context("reading working directory")?;
    let sessions = Arc::new(SessionManager::new(cwd, config.shell.max_history));
    let server = Server::bind(&config.server, shell, sessions).await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("cannot listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    log::info!("stopped");
    Ok(())
}
