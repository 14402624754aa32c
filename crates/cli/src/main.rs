mod cli;
mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use glutenscan_core::Settings;
use glutenscan_ocr::OcrBackend;
use tracing_subscriber::EnvFilter;

use cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let mut settings = load_settings(args.config.as_deref())?;

    let output = match args.command {
        Command::Normalize { text } => commands::normalize(&settings, &text),
        Command::Analyze { text } => commands::analyze(&settings, &text, args.json)?,
        Command::Scan { image, profile, remote } => {
            if let Some(profile) = profile {
                settings.scan.profile = profile.name().to_string();
            }
            match remote.or_else(|| settings.scan.remote_url.clone()) {
                Some(url) => commands::scan_remote(&url, &settings, image, args.json).await?,
                None => {
                    let backend = local_engine(&settings)?;
                    commands::scan_local(backend, &settings, image, args.json).await?
                }
            }
        }
    };
    println!("{output}");
    Ok(())
}

/// `<config dir>/glutenscan.toml` unless `--config` points elsewhere.
fn load_settings(explicit: Option<&std::path::Path>) -> anyhow::Result<Settings> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => return Ok(Settings::default()),
        },
    };
    Settings::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn default_config_path() -> Option<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "glutenscan", "glutenscan")?;
    Some(dirs.config_dir().join("glutenscan.toml"))
}

#[cfg(feature = "tesseract")]
fn local_engine(settings: &Settings) -> anyhow::Result<Arc<dyn OcrBackend>> {
    let data_path = std::env::var("TESSDATA_PREFIX").ok();
    Ok(Arc::new(glutenscan_ocr::TesseractRecognizer::new(
        data_path,
        &settings.scan.language,
    )))
}

#[cfg(not(feature = "tesseract"))]
fn local_engine(_settings: &Settings) -> anyhow::Result<Arc<dyn OcrBackend>> {
    anyhow::bail!(
        "no local OCR engine: rebuild with `--features tesseract`, or pass `--remote <URL>`"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn explicit_config_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glutenscan.toml");
        std::fs::write(&path, "[scan]\nprofile = \"basic\"\n").unwrap();
        assert_eq!(load_settings(Some(path.as_path())).unwrap().scan.profile, "basic");
    }

    #[test]
    fn broken_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glutenscan.toml");
        std::fs::write(&path, "[scan\n").unwrap();
        assert!(load_settings(Some(path.as_path())).is_err());
    }
}
