//!
//! sessiongate server binary
//! -------------------------
//! Loads `.env`, resolves configuration from the environment, constructs every
//! client and serves. Any startup failure exits non-zero before the listener opens.

use anyhow::{Context, Result};
use std::env;

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag
            && i + 1 < args.len() {
                return args[i + 1].parse::<u16>().ok();
            }
        i += 1;
    }
    None
}

fn parse_path_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("sessiongate server\n\nUSAGE:\n  sessiongate_server [--env-file PATH] [--port N]\n\nOPTIONS:\n  --env-file PATH   dotenv file to load before reading the environment (default: .env, optional)\n  --port N          listener port (env: WEBAPP_PORT)\n");
        return Ok(());
    }

    match parse_path_arg(&args, "--env-file") {
        Some(path) => {
            dotenvy::from_path(&path).with_context(|| format!("loading env file {}", path))?;
        }
        None => {
            // A missing .env is fine; the process environment may carry everything.
            let _ = dotenvy::dotenv();
        }
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let mut config = sessiongate::config::AppConfig::from_env().context("resolving configuration")?;
    if let Some(port) = parse_port_arg(&args, "--port") {
        config.webapp.port = port.to_string();
    }
    tracing::info!(
        target: "startup",
        webapp = %config.webapp.address(),
        store = ?config.store_backend,
        session_max_age_secs = config.session_max_age.as_secs(),
        "sessiongate starting"
    );

    sessiongate::bootstrap::run(config).await.context("sessiongate failed")?;
    Ok(())
}
