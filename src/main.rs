use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use log::{error, info, warn};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use thiserror::Error;

use mc_access_prober::auth::{self, Credential, CredentialError};
use mc_access_prober::config::{Config, ConfigError};
use mc_access_prober::db::{self, SqliteRepository};
use mc_access_prober::protocol::TcpGameClient;
use mc_access_prober::scanner::manager::{ClassificationEngine, EngineError, EngineSettings, Scheduler};

/// Repeatedly samples known game servers and records whether they accept
/// cracked logins and whether their whitelist holds.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Account used to sign in for whitelist checks (omit to skip them)
    #[arg(requires = "secret")]
    account: Option<String>,

    /// Secret for ACCOUNT
    secret: Option<String>,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("could not obtain credential: {0}")]
    Credential(#[from] CredentialError),
    #[error("could not install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

fn log_level() -> LevelFilter {
    std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

fn init_logging() {
    let config = ConfigBuilder::new()
        .add_filter_ignore_str("reqwest")
        .add_filter_ignore_str("hyper")
        .build();
    if TermLogger::init(log_level(), config, TerminalMode::Mixed, ColorChoice::Auto).is_err() {
        eprintln!("Logger already initialized");
    }
}

async fn obtain_credential(config: &Config, cli: Cli) -> Result<Option<Credential>, StartupError> {
    match (cli.account, cli.secret) {
        (Some(account), Some(secret)) => {
            let credential = auth::authenticate(&config.auth_server_url, &account, &secret).await?;
            info!("Signed in as {}", credential.profile_name);
            Ok(Some(credential))
        }
        _ => {
            warn!("No account given, whitelist checks are disabled");
            Ok(None)
        }
    }
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let config = Config::from_env()?;
    let conn = db::open(&config.database_url)?;
    info!(
        "Using database at {}",
        db::database_path(&config.database_url)
    );

    let credential = obtain_credential(&config, cli).await?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })?;

    let engine = ClassificationEngine::new(
        SqliteRepository::new(conn),
        TcpGameClient::new().with_session_server(config.session_server_url.clone()),
        credential,
        EngineSettings::from(&config),
    );
    let mut scheduler = Scheduler::new(engine).with_report_interval(config.report_every);

    let max_cycles = config.max_cycles;
    let stats = scheduler
        .run_until(|stats| {
            stop.load(Ordering::SeqCst) || max_cycles.is_some_and(|max| stats.cycles >= max)
        })
        .await?;

    info!(
        "Stopped after {} cycles: {} cracked, {} not whitelisted, {} no outcome, {} occupied, {} unreachable",
        stats.cycles,
        stats.cracked,
        stats.not_whitelisted,
        stats.no_outcome,
        stats.occupied,
        stats.unreachable
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
