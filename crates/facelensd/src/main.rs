use anyhow::{Context, Result};
use facelens_core::{Annotator, FacePipeline, Gallery, ModelManifest};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod routes;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), ?config, "facelensd starting");

    let manifest = ModelManifest::verify(&config.model_dir)
        .with_context(|| format!("model check failed in {}", config.model_dir.display()))?;

    let gallery = Gallery::open(&config.gallery_dir)
        .with_context(|| format!("cannot open gallery {}", config.gallery_dir.display()))?;
    tracing::info!(
        root = %gallery.root().display(),
        populated = gallery.is_populated(),
        "gallery opened"
    );

    let annotator = match &config.font_path {
        Some(path) => Annotator::with_font_file(path)?,
        None => Annotator::new(),
    };
    if !annotator.has_font() {
        tracing::warn!("FACELENS_FONT_PATH not set; faces are boxed without labels");
    }
    let annotator = Arc::new(annotator);

    let engine = engine::spawn_engine(config.workers, config.inference_timeout(), |_| {
        FacePipeline::from_manifest(&manifest, gallery.clone(), Arc::clone(&annotator))
    })?;

    let mut models = manifest.detector_names();
    models.push(facelens_core::recognizer::ARCFACE_MODEL_VERSION.to_string());

    let state = routes::AppState {
        engine,
        gallery,
        models,
    };
    let app = routes::app(state, config.max_body_bytes);

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr()))?;
    tracing::info!(addr = %listener.local_addr()?, "facelensd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facelensd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
