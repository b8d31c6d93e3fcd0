//! Web server module.
//!
//! Serves the monitor layout and bucketed health as JSON.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::ResultStore;
use crate::monitor::MonitorConfig;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitors: Arc<MonitorConfig>,
    pub store: Arc<dyn ResultStore>,
}

/// Web server for uptrail.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        monitors: Arc<MonitorConfig>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            config,
            state: AppState { monitors, store },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/api/v1/config", get(handlers::handle_config))
        .route(
            "/api/v1/metrics/default",
            get(handlers::handle_overview_metrics),
        )
        .route(
            "/api/v1/metrics/default/{monitor}/{service}",
            get(handlers::handle_default_metrics),
        )
        .route(
            "/api/v1/metrics/details/{monitor}/{service}",
            get(handlers::handle_detail_metrics),
        )
        .route(
            "/api/v1/results/{monitor}/{service}",
            get(handlers::handle_results),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
