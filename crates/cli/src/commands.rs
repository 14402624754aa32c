use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use glutenscan_core::{SafetyClassifier, SafetyLevel, Settings};
use glutenscan_ingredients::{IngredientRuleEngine, TextNormalizer};
use glutenscan_ocr::{
    assess, Assessment, ImageNormalizer, ImageSource, OcrBackend, Progress, RemoteOcrClient,
    RemoteScanner, ScanPipeline, ScanStage,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Serialize)]
struct ScanOutput<'a, T: Serialize> {
    scan: &'a T,
    #[serde(flatten)]
    assessment: &'a Assessment,
}

fn analyzer(settings: &Settings) -> (IngredientRuleEngine, SafetyClassifier) {
    (
        IngredientRuleEngine::from_settings(&settings.rules),
        SafetyClassifier::new(settings.safety.policy()),
    )
}

pub fn normalize(settings: &Settings, text: &str) -> String {
    TextNormalizer::from_settings(&settings.text).normalize(text)
}

pub fn analyze(settings: &Settings, text: &str, json: bool) -> anyhow::Result<String> {
    let (rules, classifier) = analyzer(settings);
    let assessment = assess(text, &rules, &classifier);
    if json {
        return Ok(serde_json::to_string_pretty(&assessment)?);
    }
    Ok(render_assessment(&assessment))
}

/// Scan with a local engine.
pub async fn scan_local<R>(
    backend: Arc<R>,
    settings: &Settings,
    image: PathBuf,
    json: bool,
) -> anyhow::Result<String>
where
    R: OcrBackend + ?Sized + 'static,
{
    let pipeline = ScanPipeline::from_settings(backend, settings)?;
    let (tx, reporter) = progress_reporter(json);
    let cancel = cancel_on_ctrl_c();

    let report = pipeline
        .scan_with_cancel(image_source(image), &tx, &cancel)
        .await;
    drop(tx);
    let _ = reporter.await;
    let report = report.context("scan failed")?;

    let (rules, classifier) = analyzer(settings);
    let assessment = assess(&report.text, &rules, &classifier);
    if json {
        return Ok(serde_json::to_string_pretty(&ScanOutput {
            scan: &report,
            assessment: &assessment,
        })?);
    }
    let mut out = String::new();
    writeln!(out, "{}", report.text)?;
    writeln!(
        out,
        "\n(profile {}, {} of {} passes, confidence {:.0})",
        report.profile,
        report.passes.iter().filter(|p| p.error.is_none()).count(),
        report.passes.len(),
        report.confidence,
    )?;
    out.push('\n');
    out.push_str(&render_assessment(&assessment));
    Ok(out)
}

/// Scan through a remote OCR server.
pub async fn scan_remote(
    url: &str,
    settings: &Settings,
    image: PathBuf,
    json: bool,
) -> anyhow::Result<String> {
    let scanner = RemoteScanner::new(RemoteOcrClient::new(url)?)
        .with_image_normalizer(ImageNormalizer::new(settings.scan.max_dimension, false))
        .with_text_normalizer(TextNormalizer::from_settings(&settings.text));
    let (tx, reporter) = progress_reporter(json);
    let scan = scanner.scan(image_source(image), &tx).await;
    drop(tx);
    let _ = reporter.await;
    let scan = scan.with_context(|| format!("remote scan via {url} failed"))?;

    let (rules, classifier) = analyzer(settings);
    let assessment = assess(&scan.text, &rules, &classifier);
    if json {
        return Ok(serde_json::to_string_pretty(&ScanOutput {
            scan: &scan,
            assessment: &assessment,
        })?);
    }
    Ok(format!("{}\n\n{}", scan.text, render_assessment(&assessment)))
}

/// An `http(s)://` argument is fetched; anything else is a file path.
pub fn image_source(image: PathBuf) -> ImageSource {
    match image.to_str() {
        Some(s) if s.starts_with("http://") || s.starts_with("https://") => {
            ImageSource::Url(s.to_string())
        }
        _ => ImageSource::Path(image),
    }
}

pub fn render_assessment(assessment: &Assessment) -> String {
    let verdict = &assessment.verdict;
    let label = match verdict.level {
        SafetyLevel::Unsafe => "UNSAFE",
        SafetyLevel::Caution => "CAUTION",
        SafetyLevel::Clear => "CLEAR",
    };
    let mut out = format!(
        "Verdict: {label} ({})\n{}\n",
        if verdict.is_gluten_free { "gluten free" } else { "not gluten free" },
        verdict.message
    );
    if !verdict.flagged_ingredients.is_empty() {
        out.push_str("Flagged:\n");
        for f in &verdict.flagged_ingredients {
            let _ = write!(out, "  - {} ({:.0}%)", f.name, f.confidence * 100.0);
            if let Some(reason) = &f.reason {
                let _ = write!(out, ": {reason}");
            }
            out.push('\n');
        }
    }
    out
}

// Progress goes to stderr so stdout stays clean for the result.
fn progress_reporter(
    quiet: bool,
) -> (mpsc::UnboundedSender<Progress>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Progress>();
    let handle = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            if quiet {
                continue;
            }
            let stage = match p.stage {
                ScanStage::Decode => "decoding".to_string(),
                ScanStage::Orientation => "orienting".to_string(),
                ScanStage::Filtering => "filtering".to_string(),
                ScanStage::Recognition { pass, total } => format!("pass {}/{}", pass + 1, total),
                ScanStage::Fusion => "fusing".to_string(),
                ScanStage::Normalization => "cleaning text".to_string(),
                ScanStage::Done => "done".to_string(),
                ScanStage::Reset => continue,
            };
            eprintln!("[{:>3.0}%] {stage}", p.fraction * 100.0);
        }
    });
    (tx, handle)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

#[cfg(test)]
mod tests {
    use super::*;
    use glutenscan_ocr::MockRecognizer;

    #[test]
    fn analyze_renders_flagged_ingredients() {
        let out = analyze(&Settings::default(), "wheat flour, sugar", false).unwrap();
        assert!(out.starts_with("Verdict: UNSAFE (not gluten free)"));
        assert!(out.contains("  - wheat (100%)"));
    }

    #[test]
    fn analyze_json_has_flags_and_verdict() {
        let out = analyze(&Settings::default(), "rice, salt", true).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["verdict"]["level"], "clear");
        assert_eq!(json["flags"]["is_gluten_free"], true);
    }

    #[test]
    fn normalize_uses_configured_corrections() {
        let settings = Settings::from_toml(
            r#"
            [text.corrections]
            "rlce" = "rice"
            "#,
        )
        .unwrap();
        assert_eq!(normalize(&settings, "INGREDIENTS: rlce, c0rn"), "Ingredients: rice, corn");
    }

    #[tokio::test]
    async fn scan_local_reads_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label.png");
        let img = image_fixture();
        std::fs::write(&path, img).unwrap();

        let mut settings = Settings::default();
        settings.scan.detect_orientation = false;
        let backend = Arc::new(MockRecognizer::new("INGREDIENTS: rice, barley malt"));
        let out = scan_local(backend, &settings, path, true).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["scan"]["text"], "Ingredients: rice, barley malt");
        assert_eq!(json["verdict"]["is_gluten_free"], false);
    }

    #[tokio::test]
    async fn scan_local_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockRecognizer::new(""));
        let err = scan_local(backend, &Settings::default(), dir.path().join("nope.png"), true)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Could not read image"));
    }

    #[test]
    fn image_argument_selects_source() {
        assert!(matches!(
            image_source(PathBuf::from("https://example.com/label.jpg")),
            ImageSource::Url(u) if u == "https://example.com/label.jpg"
        ));
        assert!(matches!(
            image_source(PathBuf::from("photos/label.jpg")),
            ImageSource::Path(_)
        ));
    }

    fn image_fixture() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(24, 16, image::Rgba([255, 255, 255, 255]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }
}
