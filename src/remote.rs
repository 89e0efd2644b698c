use std::net::SocketAddr;

use axum::{
  Json, Router,
  extract::State,
  routing::{get, post},
};
use log::{error, info};
use tower_http::trace::{self, TraceLayer};

use crate::state::actor::{StateCommand, StateHandle, StateReply};

pub const DEFAULT_PORT: u16 = 12345;

/// Forwards a command to the state actor and answers with its reply.
pub async fn state_handler(
  State(handle): State<StateHandle>,
  Json(command): Json<StateCommand>,
) -> Json<StateReply> {
  let reply = handle
    .request(command)
    .await
    .unwrap_or_else(|e| StateReply::Failed(e.to_string()));
  Json(reply)
}

async fn healthcheck() {}

pub fn router(handle: StateHandle) -> Router {
  Router::new()
    .route("/", post(state_handler))
    .route("/healthcheck", get(healthcheck))
    .with_state(handle)
    .layer(
      TraceLayer::new_for_http()
        .make_span_with(trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
    )
}

/// Serves `handle` on localhost until Ctrl+C or SIGTERM.
pub async fn serve(handle: StateHandle, port: u16) -> anyhow::Result<()> {
  let addr = SocketAddr::from(([127, 0, 0, 1], port));
  let listener = tokio::net::TcpListener::bind(addr).await?;
  info!("Listening on {addr}");
  axum::serve(listener, router(handle))
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      error!("Failed to install Ctrl+C handler: {e}");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        error!("Failed to install signal handler: {e}");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    () = ctrl_c => {},
    () = terminate => {},
  }
  info!("Shutting down.");
}
