//! StreamView render service entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use sv_core::{SceneState, generate_box_mesh};
use sv_renderer::{BackendKind, RenderEngine};
use sv_server::{EncodingFormat, ProcessEnv, ServerConfig, StreamServer, TransportMode, load_asset};

#[derive(Debug, Parser)]
#[command(name = "sv-server", version, about = "Remote render-and-stream service")]
struct Cli {
    /// RON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mesh asset (glTF/GLB, OBJ or STL)
    #[arg(long)]
    asset: Option<PathBuf>,

    /// Pre-parsed mesh cache file
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Render a unit cube instead of loading an asset
    #[arg(long)]
    demo_scene: bool,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// auto, gpu or software
    #[arg(long, value_parser = parse_backend)]
    backend: Option<BackendKind>,

    #[arg(long, value_enum)]
    mode: Option<TransportMode>,

    #[arg(long, value_enum)]
    encoding: Option<EncodingFormat>,

    /// Render left/right eye pairs by default
    #[arg(long)]
    stereo: bool,

    /// Attach linear depth to every frame
    #[arg(long)]
    depth: bool,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

fn parse_backend(value: &str) -> Result<BackendKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Ok(BackendKind::Auto),
        "gpu" => Ok(BackendKind::Gpu),
        "software" | "cpu" => Ok(BackendKind::Software),
        other => Err(format!("unknown backend '{other}' (expected auto, gpu or software)")),
    }
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(asset) = &self.asset {
            config.asset.path = asset.clone();
        }
        if let Some(cache) = &self.cache {
            config.asset.cache_path = Some(cache.clone());
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(width) = self.width {
            config.render.viewport.width = width;
        }
        if let Some(height) = self.height {
            config.render.viewport.height = height;
        }
        if let Some(backend) = self.backend {
            config.render.backend = backend;
        }
        if let Some(mode) = self.mode {
            config.stream.mode = mode;
        }
        if let Some(encoding) = self.encoding {
            config.stream.encoding = encoding;
        }
        if self.stereo {
            config.stereo.enabled = true;
        }
        if self.depth {
            config.stream.with_depth = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sv_server=info,sv_renderer=info,sv_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref(), &ProcessEnv)
        .context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    if let Some(path) = &cli.dump_config {
        config
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    tracing::info!("Starting StreamView render service");

    let mesh = if cli.demo_scene {
        generate_box_mesh([1.0, 1.0, 1.0])
    } else {
        load_asset(&config.asset)
            .with_context(|| format!("Failed to load asset {}", config.asset.path.display()))?
    };
    tracing::info!(
        name = %mesh.name,
        vertices = mesh.vertices.len(),
        triangles = mesh.triangle_count(),
        "Mesh loaded"
    );

    let engine = Arc::new(
        RenderEngine::from_config(&config.render).context("Failed to initialize renderer")?,
    );
    let scene = Arc::new(
        SceneState::new(Arc::new(mesh), &config.scene, config.render.viewport.aspect())
            .context("Failed to build scene")?,
    );
    let bounds = scene.mesh_bounds();
    tracing::info!(
        center = ?bounds.center(),
        radius = bounds.radius(),
        backend = engine.backend_name(),
        "Scene ready"
    );

    let server = StreamServer::new(config, scene, Arc::clone(&engine));
    let (_, handle) = server.listen().await.context("Failed to bind listener")?;

    let shutdown = server.shutdown().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        shutdown.cancel();
    });

    handle.await.context("Server task failed")?;

    if engine.is_fatal() {
        bail!("Render engine failed; exiting");
    }
    Ok(())
}
