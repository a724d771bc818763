//! Gatehouse -- social login, browser sessions and API tokens.
//!
//! This is the application entry point. It wires together all modules:
//!   - Configuration loading
//!   - Database initialization
//!   - Provider verifier + shared state
//!   - Background sweeps of expired auth state
//!   - Combined HTTP server (web pages + JSON API)
//!   - Graceful shutdown on SIGTERM / SIGINT

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use gatehouse::auth::social::HttpSocialVerifier;
use gatehouse::clock::SystemClock;
use gatehouse::config::Config;
use gatehouse::db::Database;
use gatehouse::{AppState, build_app};

/// How often expired flows, buckets, sessions and refresh tokens are dropped.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    config_path: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
enum CliAction {
    Run(CliArgs),
    Help,
    Version,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliAction, String> {
    let mut args = args.into_iter();
    let mut config_path = PathBuf::from("gatehouse.toml");

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => config_path = PathBuf::from(path),
                None => return Err("--config requires a path argument".to_string()),
            },
            "--help" | "-h" => return Ok(CliAction::Help),
            "--version" | "-V" => return Ok(CliAction::Version),
            other => return Err(format!("Unknown argument: {other}")),
        }
    }

    Ok(CliAction::Run(CliArgs { config_path }))
}

fn print_usage() {
    println!(
        "\
gatehouse {version} -- social login, sessions and API tokens

USAGE:
    gatehouse [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: gatehouse.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    GATEHOUSE_CONFIG       Alternative to --config flag
    GATEHOUSE_*            Override individual settings
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(CliAction::Run(cli)) => cli,
        Ok(CliAction::Help) => {
            print_usage();
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("gatehouse {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Err(message) => {
            eprintln!("Error: {message}");
            eprintln!("Run with --help for usage information.");
            std::process::exit(1);
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: CliArgs) -> anyhow::Result<()> {
    // Allow GATEHOUSE_CONFIG env var as alternative to --config flag
    let config_path = std::env::var("GATEHOUSE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    let config = Config::load(&config_path)?;
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        env = %config.server.app_env,
        overrides = config.env_overrides.len(),
        "Starting gatehouse"
    );
    for (setting, env_var) in config.env_overrides.iter() {
        tracing::info!(setting, env_var, "Setting overridden by environment");
    }

    let db = Database::open(&config.database.path)?;
    tracing::info!(path = %config.database.path.display(), "Database opened");

    let verifier = Arc::new(HttpSocialVerifier::new(&config.auth.oauth)?);
    let enabled = config.auth.oauth.enabled_providers();
    if enabled.is_empty() {
        tracing::warn!("No OAuth provider is configured, nobody can sign in");
    } else {
        for provider in &enabled {
            tracing::info!(provider = %provider, "OAuth provider enabled");
        }
    }

    let listen_addr = config.listen_addr();
    let app_url = config.server.app_url.clone();
    let state = AppState::new(config, db, Arc::new(SystemClock), verifier)?;

    spawn_sweeper(state.clone());

    let app = build_app(state);
    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Listening");

    println!();
    println!("  gatehouse v{} is running", env!("CARGO_PKG_VERSION"));
    println!("  Sign in:   {app_url}/auth/login");
    println!("  API:       {app_url}/api/auth/");
    println!("  Health:    {app_url}/healthz");
    println!();

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutting down gracefully");
    Ok(())
}

// ---------------------------------------------------------------------------
// Background sweeps
// ---------------------------------------------------------------------------

fn spawn_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let report = state.sweep();
            if report.total() > 0 {
                tracing::debug!(
                    flows = report.flows,
                    rate_limit_buckets = report.rate_limit_buckets,
                    revoked_families = report.revoked_families,
                    sessions = report.sessions,
                    refresh_tokens = report.refresh_tokens,
                    "Swept expired auth state"
                );
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("gatehouse={level},tower_http={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_print_usage_does_not_panic() {
        print_usage();
    }

    #[test]
    fn test_parse_args_defaults() {
        let action = parse_args(args(&[])).unwrap();
        assert_eq!(
            action,
            CliAction::Run(CliArgs {
                config_path: PathBuf::from("gatehouse.toml")
            })
        );
    }

    #[test]
    fn test_parse_args_config_path() {
        let action = parse_args(args(&["-c", "/etc/gatehouse.toml"])).unwrap();
        assert_eq!(
            action,
            CliAction::Run(CliArgs {
                config_path: PathBuf::from("/etc/gatehouse.toml")
            })
        );
    }

    #[test]
    fn test_parse_args_help_and_version() {
        assert_eq!(parse_args(args(&["--help"])).unwrap(), CliAction::Help);
        assert_eq!(parse_args(args(&["-V"])).unwrap(), CliAction::Version);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(args(&["--config"])).is_err());
        assert!(parse_args(args(&["--bogus"])).is_err());
    }
}
