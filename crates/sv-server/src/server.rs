//! Process assembly
//!
//! [`StreamServer`] wires the configured scene, engine and pipeline to the
//! HTTP listener and the background task of the active transport mode.

use std::net::SocketAddr;
use std::sync::Arc;

use sv_core::{MeshError, MeshGeometry, MeshUnit, SceneState, load_mesh_cached, load_mesh_with_unit};
use sv_renderer::RenderEngine;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AssetSettings, ServerConfig};
use crate::pipeline::RenderPipeline;
use crate::transport::{self, AppState, EventHandler};

/// Load the configured mesh asset, through the cache when one is configured
pub fn load_asset(asset: &AssetSettings) -> Result<MeshGeometry, MeshError> {
    match &asset.cache_path {
        // the cache stores meter-space geometry only
        Some(cache) if asset.unit == MeshUnit::Meters => load_mesh_cached(&asset.path, cache),
        _ => load_mesh_with_unit(&asset.path, asset.unit),
    }
}

/// A configured render service ready to accept connections
pub struct StreamServer {
    config: ServerConfig,
    pipeline: Arc<RenderPipeline>,
    shutdown: CancellationToken,
}

impl StreamServer {
    pub fn new(config: ServerConfig, scene: Arc<SceneState>, engine: Arc<RenderEngine>) -> Self {
        let shutdown = CancellationToken::new();
        let pipeline = Arc::new(RenderPipeline::from_config(
            &config,
            scene,
            engine,
            shutdown.clone(),
        ));
        Self {
            config,
            pipeline,
            shutdown,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<RenderPipeline> {
        &self.pipeline
    }

    /// Cancelled on shutdown request or unrecoverable render failure
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn router(&self) -> axum::Router {
        let handler = EventHandler::new(Arc::clone(&self.pipeline), self.config.stream.mode);
        transport::router(AppState::new(handler))
    }

    /// Bind the configured address and start serving
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.network.host, self.config.network.port);
        let listener = TcpListener::bind(&addr).await?;
        self.listen_on(listener)
    }

    /// Serve on an already bound listener until the shutdown token fires
    pub fn listen_on(&self, listener: TcpListener) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let background = transport::spawn_background(&self.config, &self.pipeline, self.shutdown.clone());
        let shutdown = self.shutdown.clone();
        let sessions = Arc::clone(self.pipeline.sessions());

        tracing::info!(
            addr = %local_addr,
            mode = ?self.config.stream.mode,
            encoding = %self.config.stream.encoding,
            backend = self.pipeline.engine().backend_name(),
            "Render service listening"
        );

        let handle = tokio::spawn(async move {
            let graceful = shutdown.clone();
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
                shutdown.cancel();
            }
            if let Some(task) = background {
                let _ = task.await;
            }
            tracing::info!(sessions = sessions.len(), "Render service stopped");
        });

        Ok((local_addr, handle))
    }
}
