use glutenscan_core::Settings;
use glutenscan_ingredients::TextNormalizer;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::filters::FilterError;
use crate::fusion::{self, default_keywords};
use crate::orchestrator::{Orchestrator, PassOutcome};
use crate::preprocess::{DecodeError, ImageNormalizer, ImageSource};
use crate::profile::ScanProfile;
use crate::progress::{Progress, ProgressSink, ScanStage};
use crate::recognizer::OcrBackend;
use crate::types::{RecognitionOptions, RecognitionResult, VariantKind};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Could not read image: {0}")]
    Decode(#[from] DecodeError),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] FilterError),
    #[error("No text recognized: all {attempted} OCR passes failed")]
    AllPassesFailed { attempted: usize },
    #[error("Remote OCR failed: {0}")]
    Remote(String),
    #[error("Unknown scan profile: '{0}'")]
    UnknownProfile(String),
    #[error("Scan cancelled")]
    Cancelled,
}

/// Tunables shared by every scan of a pipeline.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub max_dimension: u32,
    pub detect_orientation: bool,
    pub pass_timeout: Duration,
    pub parallel_passes: bool,
    pub base_options: RecognitionOptions,
    pub keywords: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ScanConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let scan = &settings.scan;
        Self {
            max_dimension: scan.max_dimension,
            detect_orientation: scan.detect_orientation,
            pass_timeout: Duration::from_secs(scan.pass_timeout_secs),
            parallel_passes: scan.parallel_passes,
            base_options: RecognitionOptions {
                language: scan.language.clone(),
                ..Default::default()
            },
            keywords: settings.text.keywords.clone().unwrap_or_else(default_keywords),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub index: usize,
    pub variant: VariantKind,
    pub confidence: Option<f32>,
    pub chars: usize,
    pub error: Option<String>,
}

impl From<&PassOutcome> for PassSummary {
    fn from(o: &PassOutcome) -> Self {
        match &o.result {
            Ok(r) => Self {
                index: o.index,
                variant: o.variant,
                confidence: Some(r.confidence()),
                chars: r.text().chars().count(),
                error: None,
            },
            Err(e) => Self {
                index: o.index,
                variant: o.variant,
                confidence: None,
                chars: 0,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Everything a scan produced, short of the safety verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub profile: String,
    /// Fused text before normalization.
    pub raw_text: String,
    /// Normalized ingredient text.
    pub text: String,
    /// Best confidence among the successful passes.
    pub confidence: f32,
    pub passes: Vec<PassSummary>,
    pub width: u32,
    pub height: u32,
    pub rotation: f32,
}

/// Orchestrates: normalize image → filter bank → recognition passes → fusion → text cleanup.
pub struct ScanPipeline<R: OcrBackend + ?Sized + 'static> {
    orchestrator: Orchestrator<R>,
    backend: Arc<R>,
    profile: ScanProfile,
    image: ImageNormalizer,
    text: TextNormalizer,
    keywords: Vec<String>,
}

impl<R: OcrBackend + ?Sized + 'static> ScanPipeline<R> {
    pub fn new(backend: Arc<R>, profile: ScanProfile) -> Self {
        Self::with_config(backend, profile, ScanConfig::default())
    }

    pub fn with_config(backend: Arc<R>, profile: ScanProfile, config: ScanConfig) -> Self {
        let orchestrator = Orchestrator::new(Arc::clone(&backend))
            .with_base_options(config.base_options)
            .with_timeout(config.pass_timeout)
            .with_parallel(config.parallel_passes);
        Self {
            orchestrator,
            backend,
            profile,
            image: ImageNormalizer::new(config.max_dimension, config.detect_orientation),
            text: TextNormalizer::default(),
            keywords: config.keywords,
        }
    }

    /// Build from loaded settings; the profile is taken from `[scan].profile`.
    pub fn from_settings(backend: Arc<R>, settings: &Settings) -> Result<Self, ScanError> {
        let profile = ScanProfile::by_name(&settings.scan.profile)
            .ok_or_else(|| ScanError::UnknownProfile(settings.scan.profile.clone()))?;
        Ok(Self::with_config(backend, profile, ScanConfig::from_settings(settings))
            .with_text_normalizer(TextNormalizer::from_settings(&settings.text)))
    }

    pub fn with_text_normalizer(mut self, text: TextNormalizer) -> Self {
        self.text = text;
        self
    }

    pub fn profile(&self) -> &ScanProfile {
        &self.profile
    }

    /// Run one scan. On failure the sink receives [`ScanStage::Reset`].
    pub async fn scan(
        &self,
        source: ImageSource,
        progress: &dyn ProgressSink,
    ) -> Result<ScanReport, ScanError> {
        match self.run(source, progress).await {
            Ok(report) => {
                progress.notify(Progress::new(ScanStage::Done, 1.0));
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(error = %e, profile = %self.profile.name, "scan failed");
                progress.notify(Progress::reset());
                Err(e)
            }
        }
    }

    /// Like [`scan`](Self::scan), but abandons in-flight passes once `cancel` fires.
    pub async fn scan_with_cancel(
        &self,
        source: ImageSource,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(profile = %self.profile.name, "scan cancelled");
                progress.notify(Progress::reset());
                Err(ScanError::Cancelled)
            }
            result = self.scan(source, progress) => result,
        }
    }

    async fn run(
        &self,
        source: ImageSource,
        progress: &dyn ProgressSink,
    ) -> Result<ScanReport, ScanError> {
        progress.notify(Progress::new(ScanStage::Decode, 0.0));
        let normalized = self.image.decode_and_fit(source).await?;
        progress.notify(Progress::new(ScanStage::Orientation, 0.1));
        let normalized = self.image.orient(normalized, &self.backend).await;
        let scan_id = normalized.scan_id.clone();
        let (width, height, rotation) =
            (normalized.width(), normalized.height(), normalized.rotation);
        tracing::info!(
            %scan_id,
            profile = %self.profile.name,
            width,
            height,
            original_width = normalized.original_width,
            original_height = normalized.original_height,
            "scan started"
        );

        progress.notify(Progress::new(ScanStage::Filtering, 0.15));
        let variants = self
            .profile
            .filter_bank()
            .build_variants_async(&normalized.image)
            .await?;
        drop(normalized);

        let outcomes = self
            .orchestrator
            .run_passes(&variants, &self.profile.passes, progress)
            .await;
        drop(variants);

        let passes: Vec<PassSummary> = outcomes.iter().map(PassSummary::from).collect();
        let successes: Vec<RecognitionResult> =
            outcomes.into_iter().filter_map(|o| o.result.ok()).collect();
        if successes.is_empty() {
            return Err(ScanError::AllPassesFailed { attempted: passes.len() });
        }

        progress.notify(Progress::new(ScanStage::Fusion, 0.9));
        let raw_text =
            fusion::fuse(&successes, self.profile.fusion, &self.keywords).unwrap_or_default();
        let confidence = successes
            .iter()
            .map(RecognitionResult::confidence)
            .fold(0.0, f32::max);

        progress.notify(Progress::new(ScanStage::Normalization, 0.95));
        let text = self.text.normalize(&raw_text);

        tracing::info!(
            %scan_id,
            succeeded = successes.len(),
            attempted = passes.len(),
            confidence,
            chars = text.len(),
            "scan complete"
        );

        Ok(ScanReport {
            scan_id,
            profile: self.profile.name.clone(),
            raw_text,
            text,
            confidence,
            passes,
            width,
            height,
            rotation,
        })
    }
}
