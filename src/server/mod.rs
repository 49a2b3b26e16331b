//! HTTP API served by the daemon
//!
//! The same router is served on a unix socket (CLI traffic) and on a loopback
//! TCP port (dashboard).

mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::api_router().layer(cors).with_state(state)
}

/// Bind the unix socket. A leftover socket file nobody answers on is replaced;
/// one with a live listener is an error.
#[cfg(unix)]
pub fn bind_unix_listener(socket_path: &std::path::Path) -> std::io::Result<tokio::net::UnixListener> {
    use std::os::unix::net::{UnixListener, UnixStream};

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = match UnixListener::bind(socket_path) {
        Ok(listener) => listener,
        Err(bind_error) if bind_error.kind() == std::io::ErrorKind::AddrInUse => {
            if UnixStream::connect(socket_path).is_ok() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("daemon already listening at {}", socket_path.display()),
                ));
            }
            crate::utils::remove_file_if_exists(socket_path)?;
            UnixListener::bind(socket_path)?
        }
        Err(bind_error) => return Err(bind_error),
    };

    listener.set_nonblocking(true)?;
    tokio::net::UnixListener::from_std(listener)
}

#[cfg(unix)]
pub async fn serve_unix(
    listener: tokio::net::UnixListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

pub async fn serve_tcp(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bind_replaces_stale_socket_file() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("orchestrator.sock");
        std::fs::write(&socket_path, "stale").unwrap();

        let listener = bind_unix_listener(&socket_path).unwrap();
        drop(listener);
    }

    #[tokio::test]
    async fn test_bind_keeps_active_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("orchestrator.sock");
        let _active = bind_unix_listener(&socket_path).unwrap();

        let error = bind_unix_listener(&socket_path).unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::AddrInUse);
    }
}
