use std::{io::ErrorKind, net::SocketAddr, sync::Arc, time::Duration};

use color_eyre::{
    Result,
    eyre::{Report, WrapErr, eyre},
};
use tokio::select;
use tracing::{info, warn};

use crate::{
    config::Config,
    server::{self, ServerConfig, ServerHandle},
    sink::{CappedFile, Sink},
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DumpApp {
    server: ServerHandle,
}

impl DumpApp {
    /// Builds the sink and starts listening. Nothing is bound when the
    /// configuration is invalid or the output file cannot be opened.
    pub async fn bootstrap(config: Config) -> Result<Self> {
        config.validate()?;

        let sink = match config.output_file() {
            Some(path) => {
                info!(path = %path.display(), max_size = %config.max_output_size, "output file");
                let file = CappedFile::open(path, config.max_output_size)
                    .await
                    .wrap_err_with(|| format!("unable to open file {}", path.display()))?;
                Sink::File(file)
            }
            None => {
                info!("no output file configured; discarding request dumps");
                Sink::Discard
            }
        };

        let listen_addr = config.listen_addr.clone();
        let server = server::spawn(Arc::new(sink), ServerConfig { listen_addr })
            .await
            .map_err(|err| match err {
                server::ServerError::Io(io_err) if io_err.kind() == ErrorKind::AddrInUse => eyre!(
                    "{} is already in use. Pass -l <addr:port> to choose a different address.",
                    config.listen_addr
                ),
                other => Report::from(other),
            })?;

        Ok(Self { server })
    }

    pub fn addr(&self) -> SocketAddr {
        self.server.addr()
    }

    /// Serves until SIGINT or SIGTERM, then drains in-flight requests for at
    /// most five seconds. A failed drain is logged and does not fail the run.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.addr(), "recording requests until SIGINT or SIGTERM");
        wait_for_termination().await;
        self.stop().await;
        Ok(())
    }

    async fn stop(self) {
        match self.server.shutdown(SHUTDOWN_TIMEOUT).await {
            Ok(()) => info!("server stopped"),
            Err(error) => warn!(%error, "unable to shutdown server properly"),
        }
    }
}

async fn wait_for_termination() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = interrupt => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
