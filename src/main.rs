mod app;
mod config;
mod dump;
mod server;
mod sink;
mod size;

use color_eyre::{Result, eyre::eyre};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing()?;

    let config = config::Config::load();
    let app = app::DumpApp::bootstrap(config).await?;
    app.run().await
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("reqdump=info"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| eyre!(err))?;

    Ok(())
}
