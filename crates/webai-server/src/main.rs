//! WebAI — OpenAI-compatible local API over browser-authenticated AI web apps.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use webai_browser::BrowserCookieJar;
use webai_chat::CredentialResolver;
use webai_core::config::DEFAULT_CONFIG_FILE;
use webai_core::{ConfigStore, Provider};
use webai_server::supervisor::{self, Supervisor, SupervisorOptions};
use webai_server::{build_router, routes, AppState};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "webai", version, about = "OpenAI-compatible API over browser-authenticated AI web apps")]
struct Cli {
    /// INI configuration file; created with defaults when missing.
    #[arg(long, global = true, env = "WEBAI_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the HTTP API in this process.
    Serve(Bind),
    /// Run the API or the fallback server as a child and switch between them.
    Supervise {
        #[command(flatten)]
        bind: Bind,
        /// Seconds to wait for a started server to answer.
        #[arg(long, default_value_t = 30)]
        ready_timeout: u64,
    },
    /// Show where a provider's session cookies would come from.
    Cookies {
        /// gemini or claude
        provider: String,
    },
}

#[derive(Args, Default)]
struct Bind {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(
        ConfigStore::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?,
    );

    match cli.command {
        Some(Cmd::Serve(bind)) => serve(config, bind).await,
        Some(Cmd::Supervise {
            bind,
            ready_timeout,
        }) => supervise(config, &cli.config, bind, ready_timeout).await,
        None => supervise(config, &cli.config, Bind::default(), 30).await,
        Some(Cmd::Cookies { provider }) => cookies(config, &provider),
    }
}

fn address(config: &ConfigStore, bind: Bind) -> (String, u16) {
    let server = config.settings().server;
    (
        bind.host.unwrap_or(server.host),
        bind.port.unwrap_or(server.port),
    )
}

async fn serve(config: Arc<ConfigStore>, bind: Bind) -> anyhow::Result<()> {
    let (host, port) = address(&config, bind);
    let settings = config.settings();
    info!(
        "Default AI: {} ({})",
        settings.default_ai,
        settings
            .default_provider()
            .map(|p| settings.default_model(p))
            .unwrap_or_default()
    );

    let state = Arc::new(AppState::new(config));
    routes::spawn_session_sweeper(state.router.clone(), SWEEP_INTERVAL);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {}:{}", host, port))?;
    info!("WebAI server listening on http://{}:{}", host, port);
    info!("API docs at http://{}:{}/docs", host, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn supervise(
    config: Arc<ConfigStore>,
    config_path: &Path,
    bind: Bind,
    ready_timeout: u64,
) -> anyhow::Result<()> {
    let (host, port) = address(&config, bind);
    let settings = config.settings();
    let resolver = CredentialResolver::new(config.clone(), Arc::new(BrowserCookieJar::new()));
    let mode = supervisor::initial_mode(&settings, &resolver);

    let supervisor = Supervisor::new(SupervisorOptions {
        host,
        port,
        config_path: config_path.to_path_buf(),
        fallback_command: settings.server.fallback_command.clone(),
        exe: std::env::current_exe().context("locating the webai executable")?,
        readiness_timeout: Duration::from_secs(ready_timeout),
    });
    supervisor.run(mode).await
}

fn cookies(config: Arc<ConfigStore>, name: &str) -> anyhow::Result<()> {
    let provider =
        Provider::from_name(name).ok_or_else(|| anyhow!("unknown provider '{}'", name))?;
    let resolver = CredentialResolver::new(config, Arc::new(BrowserCookieJar::new()));
    let credentials = resolver.resolve(provider)?;

    println!("{} credentials from {:?}:", provider, credentials.source);
    for (cookie, value) in credentials.masked() {
        println!("  {} = {}", cookie, value);
    }
    Ok(())
}
