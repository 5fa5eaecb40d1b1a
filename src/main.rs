mod api;
mod app;
mod config;
mod events;
mod protocol;
mod session;
mod source;
mod state;
mod transport;
mod tui;
mod uptime;

use std::{fs::OpenOptions, io, sync::Mutex};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let config = config::Config::parse();
    init_tracing(&config)?;

    let app = app::AlertDeckApp::bootstrap(config).await?;
    app.run().await
}

fn init_tracing(config: &config::Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("alertdeck=info,alertdeck::session=debug"))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    let installed = match (&config.log_file, config.headless) {
        (Some(path), _) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        (None, true) => builder.with_writer(io::stderr).try_init(),
        (None, false) => builder.with_writer(io::sink).try_init(),
    };

    installed.map_err(|err| eyre!(err))?;
    Ok(())
}
