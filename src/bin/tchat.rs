use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use toolchat::app::{CtrlC, Session};
use toolchat::config::Cli;
use toolchat::confirm::prompt::PromptOptions;
use toolchat::confirm::Confirmer;
use toolchat::display::Display;
use toolchat::engine::client::HttpEngine;
use toolchat::readline::RustylineReader;
use toolchat::terminal::{self, StdoutSurface};
use toolchat::trust::TrustStore;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// stderr shares the terminal with the live display, so logs can go to a file.
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "toolchat=warn".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry.with(fmt::layer().with_writer(io::stderr)).init(),
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;
    terminal::install_panic_hook_once();

    let config = cli.into_options()?.complete()?;
    config.validate()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workspace = %config.workspace().display(),
        "starting session"
    );

    let options = config.options.clone();
    let engine = HttpEngine::new(&options.engine_url);
    let reader = RustylineReader::new(&options.app_name, &options.tool)?;
    let display = Display::new(StdoutSurface::new(), reader, options.repaint_interval);
    let confirmer = Confirmer::new(
        TrustStore::open(&options.app_name, options.trusted_prefixes.clone()),
        options.system_tool_prefix.clone(),
        PromptOptions {
            exec_directory_scope: options.exec_directory_scope,
        },
    );

    let result = Session::new(engine, display, confirmer, CtrlC, options)
        .run()
        .await;
    terminal::restore();
    drop(config);
    result
}
