use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
};
use thiserror::Error;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::{dump, sink::Sink};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Clone)]
struct HttpState {
    sink: Arc<Sink>,
}

#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<Result<(), std::io::Error>>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting connections and waits up to `timeout` for in-flight
    /// requests to finish. The serve task is aborted if they do not.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            if tx.send(()).is_err() {
                warn!("server shutdown signal receiver dropped");
            }
        }

        let mut join_handle = match self.join_handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };

        tokio::select! {
            join_result = &mut join_handle => match join_result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(ServerError::Io(error)),
                Err(error) => Err(ServerError::Join(error)),
            },
            _ = time::sleep(timeout) => {
                join_handle.abort();
                Err(ServerError::ShutdownTimeout(timeout))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server task failed to join: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("in-flight requests did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Every path and method lands on the dump handler.
fn router(sink: Arc<Sink>) -> Router {
    Router::new()
        .fallback(dump_request)
        .with_state(HttpState { sink })
}

pub async fn spawn(sink: Arc<Sink>, config: ServerConfig) -> Result<ServerHandle, ServerError> {
    let listener = TcpListener::bind(config.listen_addr.as_str()).await?;
    let addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = axum::serve(listener, router(sink).into_make_service()).with_graceful_shutdown(
        async {
            let _ = shutdown_rx.await;
        },
    );

    let join_handle = tokio::spawn(async move {
        if let Err(error) = server.await {
            warn!(?error, "HTTP server terminated with error");
            Err(error)
        } else {
            Ok(())
        }
    });

    info!(%addr, "listening");

    Ok(ServerHandle {
        addr,
        shutdown: Some(shutdown_tx),
        join_handle: Some(join_handle),
    })
}

async fn dump_request(State(state): State<HttpState>, request: Request<Body>) -> StatusCode {
    let raw = match dump::capture(request).await {
        Ok(raw) => raw,
        Err(error) => {
            warn!(%error, "unable to dump request");
            return StatusCode::OK;
        }
    };

    match state.sink.write(&dump::serialize(&raw)).await {
        Ok(written) => debug!(bytes = written, "request dump recorded"),
        Err(error) => warn!(%error, "unable to write request dump"),
    }

    StatusCode::OK
}
