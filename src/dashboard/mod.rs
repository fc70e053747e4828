//! Dashboard Module
//!
//! Local HTTP/WebSocket front end for the overlay: render commands stream out
//! over `/ws`, pointer events and user commands stream back in.
//! Only compiled when the `dashboard` feature is enabled.

mod api;
mod types;

pub use api::create_router;
pub use types::*;

use crate::engine::EngineHandle;
use crate::render::CrosshairInjector;

/// Shared state behind every route
#[derive(Clone)]
pub struct DashboardState {
    pub engine: EngineHandle,
    pub surface: CrosshairInjector,
}

/// Start the dashboard server
pub async fn start_server(state: DashboardState, bind_addr: &str) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr: std::net::SocketAddr = bind_addr.parse()?;

    tracing::info!("🖥️ Dashboard starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
