mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use filelink_botapi::BotClient;
use filelink_ingest::{BotLoop, BotLoopConfig, Ingestor};
use filelink_registry::{RandomTokenIssuer, RegistryStore};
use filelink_relay::{
    BotContentSource, ContentSource, RelayResolver, RelayStats, StreamingProxy, StubContentSource,
};
use filelink_rpc::{start_server, AdminGateway, AppState};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, DEFAULT_ADMIN_SECRET};

/// Pause between failed long polls.
const POLL_RETRY_BACKOFF: Duration = Duration::from_secs(5);

fn cli() -> Command {
    Command::new("filelink-node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Chat file registry with a streaming HTTP relay")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Override HTTP bind host"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override HTTP port"),
        )
        .arg(
            Arg::new("db-file")
                .long("db-file")
                .value_name("FILE")
                .help("Registry file location"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format"),
        )
        .arg(
            Arg::new("no-bot")
                .long("no-bot")
                .action(ArgAction::SetTrue)
                .help("Serve HTTP only; do not poll the chat platform"),
        )
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(host) = matches.get_one::<String>("host") {
        config.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }
    if let Some(db_file) = matches.get_one::<String>("db-file") {
        config.db_file = db_file.into();
    }
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }
    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }
    if matches.get_flag("no-bot") {
        config.bot_enabled = false;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config_with_overrides(&matches)?;
    init_logging(&config)?;

    if let Some(path) = &config.config_path {
        info!("Loaded configuration from {}", path.display());
    }
    if config.admin_secret == DEFAULT_ADMIN_SECRET {
        warn!("ADMIN_SECRET is the built-in default; set a real secret before exposing /admin");
    }

    run(config).await
}

async fn run(config: AppConfig) -> Result<()> {
    let registry = Arc::new(RegistryStore::open(config.db_file()));

    let bot_client = match &config.bot_token {
        Some(token) => Some(
            BotClient::new(&config.api_base, token.clone(), config.upstream_timeout)
                .context("failed to create chat platform client")?,
        ),
        None => None,
    };

    let source: Arc<dyn ContentSource> = match &bot_client {
        Some(client) => Arc::new(BotContentSource::new(client.clone())),
        None => {
            warn!("No BOT_TOKEN configured; every stream request will fail upstream");
            Arc::new(StubContentSource::new())
        }
    };

    let resolver = Arc::new(RelayResolver::new(
        registry.clone(),
        source,
        config.upstream_timeout,
    ));
    // Transfers are not time-bounded; only connecting is.
    let relay_http = match &bot_client {
        Some(client) => client.http().clone(),
        None => reqwest::Client::builder()
            .connect_timeout(config.upstream_timeout)
            .build()
            .context("failed to build relay HTTP client")?,
    };
    let proxy = Arc::new(StreamingProxy::new(relay_http, Arc::new(RelayStats::new())));
    let admin = Arc::new(AdminGateway::new(registry.clone(), config.admin_secret.clone()));

    let state = AppState::new(
        registry.clone(),
        resolver,
        proxy,
        admin,
        config.landing_delay,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bot_handle = match (config.bot_enabled, bot_client) {
        (true, Some(client)) => {
            let ingestor = Arc::new(Ingestor::new(
                registry.clone(),
                Arc::new(RandomTokenIssuer),
                config.max_upload_bytes,
            ));
            let bot = BotLoop::new(
                client,
                ingestor,
                BotLoopConfig {
                    base_url: config.base_url.clone(),
                    poll_timeout: config.poll_timeout,
                    retry_backoff: POLL_RETRY_BACKOFF,
                },
            );
            Some(tokio::spawn(bot.run(shutdown_rx.clone())))
        }
        _ => {
            info!("Bot loop disabled; serving HTTP only");
            None
        }
    };

    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    let mut server_shutdown = shutdown_rx.clone();
    let shutdown = async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    };

    info!(
        files = registry.len(),
        base_url = %config.base_url,
        "Filelink node is ready"
    );
    start_server(state, &config.bind_addr(), shutdown).await?;

    if let Some(handle) = bot_handle {
        handle.await.context("bot loop task panicked")??;
    }

    info!("Filelink node shutdown complete");
    Ok(())
}

/// Flip `shutdown_tx` once `signal` fires. If the signal cannot be listened
/// for, the sender is held forever so receivers keep running.
async fn forward_shutdown<F>(signal: F, shutdown_tx: watch::Sender<bool>)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
        Err(err) => {
            error!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_apply() {
        let matches = cli()
            .try_get_matches_from([
                "filelink-node",
                "--port",
                "8081",
                "--host",
                "127.0.0.1",
                "--db-file",
                "/tmp/registry.json",
                "--log-format",
                "json",
                "--no-bot",
            ])
            .unwrap();

        let mut config = AppConfig::from_config(&::config::Config::default(), |_| None).unwrap();
        apply_overrides(&matches, &mut config);

        assert_eq!(config.bind_addr(), "127.0.0.1:8081");
        assert_eq!(config.db_file(), std::path::Path::new("/tmp/registry.json"));
        assert_eq!(config.log_format, "json");
        assert!(!config.bot_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cli_rejects_unknown_log_format() {
        assert!(cli()
            .try_get_matches_from(["filelink-node", "--log-format", "xml"])
            .is_err());
    }

    #[tokio::test]
    async fn shutdown_signal_is_forwarded() {
        let (tx, mut rx) = watch::channel(false);
        forward_shutdown(async { Ok::<(), std::io::Error>(()) }, tx).await;
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn failed_signal_listener_keeps_receivers_running() {
        let (tx, mut rx) = watch::channel(false);
        let failed = async { Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "no signals")) };
        let task = tokio::spawn(forward_shutdown(failed, tx));

        let waited = tokio::time::timeout(Duration::from_millis(100), rx.changed()).await;
        assert!(waited.is_err(), "receiver must not observe a closed channel");
        assert!(!*rx.borrow());
        assert!(!task.is_finished());
        task.abort();
    }
}
