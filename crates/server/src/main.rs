mod api;
mod telemetry;

use anyhow::Context;
use glutenscan_core::Settings;
use glutenscan_ocr::OcrBackend;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_ADDR: &str = "0.0.0.0:5000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init("glutenscan-server");

    let settings = match std::env::var_os("GLUTENSCAN_CONFIG") {
        Some(path) => Settings::load(&PathBuf::from(path)).context("loading settings")?,
        None => Settings::default(),
    };
    let (backend, engine_available) = engine(&settings);
    let state = api::AppState::from_settings(backend, &settings, engine_available)
        .context("building scan pipeline")?;

    let addr: SocketAddr = std::env::var("GLUTENSCAN_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("parsing GLUTENSCAN_ADDR")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, profile = %settings.scan.profile, engine_available, "glutenscan server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[cfg(feature = "tesseract")]
fn engine(settings: &Settings) -> (Arc<dyn OcrBackend>, bool) {
    let data_path = std::env::var("TESSDATA_PREFIX").ok();
    let backend = glutenscan_ocr::TesseractRecognizer::new(data_path, &settings.scan.language);
    (Arc::new(backend), true)
}

#[cfg(not(feature = "tesseract"))]
fn engine(_settings: &Settings) -> (Arc<dyn OcrBackend>, bool) {
    tracing::warn!("built without the tesseract feature; OCR requests will fail");
    (Arc::new(glutenscan_ocr::UnavailableRecognizer), false)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
