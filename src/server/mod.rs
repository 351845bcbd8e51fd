//! HTTP front end
//!
//! Public endpoints serve clients; `/internal/*` endpoints are used by peers
//! to push and pull blobs. All store and digest work is handed to tokio's
//! blocking pool, so request tasks never block the executor.

mod body;
mod error;
mod handler;
mod router;

pub use body::BodyReader;
pub use error::{ApiError, ApiResult};
pub use router::build_router;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    /// Push newly uploaded blobs to every peer
    pub replicate: bool,
    /// Mount debug endpoints
    pub debug: bool,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        AppState {
            coordinator,
            replicate: false,
            debug: false,
        }
    }
}

/// Server settings
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub listen: SocketAddr,
    pub replicate: bool,
    pub debug: bool,
}

impl From<&Config> for ServerOptions {
    fn from(config: &Config) -> Self {
        ServerOptions {
            listen: config.listen,
            replicate: config.replicate_uploads,
            debug: config.debug,
        }
    }
}

/// A xorcas HTTP server
pub struct Server {
    coordinator: Arc<Coordinator>,
    options: ServerOptions,
}

impl Server {
    pub fn new(coordinator: Arc<Coordinator>, options: ServerOptions) -> Self {
        Server {
            coordinator,
            options,
        }
    }

    /// Build the router (useful for testing)
    pub fn router(&self) -> axum::Router {
        build_router(AppState {
            coordinator: self.coordinator.clone(),
            replicate: self.options.replicate,
            debug: self.options.debug,
        })
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let listener = TcpListener::bind(self.options.listen).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve_on(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let app = self.router();
        tracing::info!(addr = %listener.local_addr()?, "xorcas listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestTree;
    use crate::store::{ContentStore, ShardSchema};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::{tempdir, TempDir};
    use tower::util::ServiceExt;

    fn state(debug: bool) -> (TempDir, AppState) {
        let dir = tempdir().unwrap();
        let store = ContentStore::open(
            dir.path().join("data"),
            ShardSchema::new(vec![8, 8]).unwrap(),
            false,
        )
        .unwrap();
        let digest = DigestTree::open(dir.path().join("cache"), 2, 4).unwrap();
        let mut state = AppState::new(Arc::new(Coordinator::new(store, digest)));
        state.debug = debug;
        (dir, state)
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (_dir, state) = state(false);
        let response = build_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn debug_routes_hidden_by_default() {
        let (_dir, state) = state(false);
        let uri = format!("/debug/add-xor/{}", crate::model::Hash::digest(b"x"));
        let response = build_router(state)
            .oneshot(Request::post(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn debug_routes_mounted_when_enabled() {
        let (_dir, state) = state(true);
        let hash = crate::model::Hash::digest(b"x");
        let coordinator = state.coordinator.clone();
        let response = build_router(state)
            .oneshot(
                Request::post(format!("/debug/add-xor/{}", hash))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(coordinator.digest_leaf(&hash).unwrap(), hash);
    }

    #[test]
    fn options_from_config() {
        let config = Config {
            replicate_uploads: true,
            ..Config::default()
        };
        let options = ServerOptions::from(&config);
        assert!(options.replicate);
        assert!(!options.debug);
        assert_eq!(options.listen, config.listen);
    }
}
