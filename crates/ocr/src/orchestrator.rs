use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::profile::PassSpec;
use crate::progress::{Progress, ProgressSink, ScanStage};
use crate::recognizer::{OcrBackend, OcrError};
use crate::types::{PreprocessVariant, RecognitionOptions, RecognitionResult, VariantKind};

pub const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(30);

// Share of overall scan progress spent in recognition.
const RECOGNITION_START: f32 = 0.3;
const RECOGNITION_SPAN: f32 = 0.55;

/// Result of one pass, successful or not. `index` is the pass position in the profile.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub index: usize,
    pub variant: VariantKind,
    pub options: RecognitionOptions,
    pub result: Result<RecognitionResult, OcrError>,
}

/// Drives an [`OcrBackend`] over the preprocessed variants.
pub struct Orchestrator<R: ?Sized> {
    backend: Arc<R>,
    base_options: RecognitionOptions,
    timeout: Duration,
    parallel: bool,
}

impl<R: OcrBackend + ?Sized + 'static> Orchestrator<R> {
    pub fn new(backend: Arc<R>) -> Self {
        Self {
            backend,
            base_options: RecognitionOptions::default(),
            timeout: DEFAULT_PASS_TIMEOUT,
            parallel: false,
        }
    }

    pub fn with_base_options(mut self, options: RecognitionOptions) -> Self {
        self.base_options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// One pass on the blocking pool. A timeout is reported like any engine
    /// failure; the abandoned call's result is discarded.
    pub async fn recognize(
        &self,
        variant: &PreprocessVariant,
        options: RecognitionOptions,
    ) -> Result<RecognitionResult, OcrError> {
        recognize_with(Arc::clone(&self.backend), variant, options, self.timeout).await
    }

    /// Run every pass, isolating failures. Outcomes come back ordered by pass
    /// index regardless of completion order.
    pub async fn run_passes(
        &self,
        variants: &[PreprocessVariant],
        passes: &[PassSpec],
        progress: &dyn ProgressSink,
    ) -> Vec<PassOutcome> {
        let total = passes.len();
        let mut outcomes = Vec::with_capacity(total);

        if self.parallel {
            let mut set = JoinSet::new();
            for (index, pass) in passes.iter().enumerate() {
                let options = self.base_options.merged(&pass.options);
                let Some(variant) = find_variant(variants, pass.variant) else {
                    let outcome = missing_variant(index, pass, options);
                    report(&outcome, progress, outcomes.len() + 1, total);
                    outcomes.push(outcome);
                    continue;
                };
                started(index, progress, outcomes.len(), total);
                let backend = Arc::clone(&self.backend);
                let timeout = self.timeout;
                set.spawn(async move {
                    let result = recognize_with(backend, &variant, options.clone(), timeout).await;
                    PassOutcome { index, variant: variant.kind, options, result }
                });
            }
            let mut done = outcomes.len();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(outcome) => {
                        done += 1;
                        report(&outcome, progress, done, total);
                        outcomes.push(outcome);
                    }
                    Err(e) => tracing::error!(error = %e, "recognition task panicked"),
                }
            }
        } else {
            for (index, pass) in passes.iter().enumerate() {
                let options = self.base_options.merged(&pass.options);
                started(index, progress, index, total);
                let outcome = match find_variant(variants, pass.variant) {
                    Some(variant) => {
                        let result = self.recognize(&variant, options.clone()).await;
                        PassOutcome { index, variant: variant.kind, options, result }
                    }
                    None => missing_variant(index, pass, options),
                };
                report(&outcome, progress, index + 1, total);
                outcomes.push(outcome);
            }
        }

        outcomes.sort_by_key(|o| o.index);
        fill_gaps(outcomes, passes, &self.base_options)
    }
}

async fn recognize_with<R: OcrBackend + ?Sized + 'static>(
    backend: Arc<R>,
    variant: &PreprocessVariant,
    options: RecognitionOptions,
    timeout: Duration,
) -> Result<RecognitionResult, OcrError> {
    let bytes = Arc::clone(&variant.encoded);
    let task = tokio::task::spawn_blocking(move || backend.recognize(&bytes, &options));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(OcrError::Engine(format!("recognition task failed: {join}"))),
        Err(_) => Err(OcrError::Timeout(timeout)),
    }
}

fn find_variant(variants: &[PreprocessVariant], kind: VariantKind) -> Option<PreprocessVariant> {
    variants.iter().find(|v| v.kind == kind).cloned()
}

fn missing_variant(index: usize, pass: &PassSpec, options: RecognitionOptions) -> PassOutcome {
    PassOutcome {
        index,
        variant: pass.variant,
        options,
        result: Err(OcrError::Engine(format!("variant '{}' was not produced", pass.variant))),
    }
}

// A panicked task leaves no outcome; record it as a failed pass.
fn fill_gaps(
    outcomes: Vec<PassOutcome>,
    passes: &[PassSpec],
    base: &RecognitionOptions,
) -> Vec<PassOutcome> {
    if outcomes.len() == passes.len() {
        return outcomes;
    }
    let mut by_index = outcomes.into_iter().peekable();
    let mut filled = Vec::with_capacity(passes.len());
    for (index, pass) in passes.iter().enumerate() {
        match by_index.next_if(|o| o.index == index) {
            Some(o) => filled.push(o),
            None => filled.push(PassOutcome {
                index,
                variant: pass.variant,
                options: base.merged(&pass.options),
                result: Err(OcrError::Engine("recognition task aborted".into())),
            }),
        }
    }
    filled
}

fn recognition_fraction(done: usize, total: usize) -> f32 {
    RECOGNITION_START + RECOGNITION_SPAN * done as f32 / total.max(1) as f32
}

fn started(index: usize, progress: &dyn ProgressSink, done: usize, total: usize) {
    tracing::trace!(pass = index, total, "pass started");
    progress.notify(Progress::new(
        ScanStage::Recognition { pass: index, total },
        recognition_fraction(done, total),
    ));
}

fn report(outcome: &PassOutcome, progress: &dyn ProgressSink, done: usize, total: usize) {
    match &outcome.result {
        Ok(r) => tracing::debug!(
            pass = outcome.index,
            variant = %outcome.variant,
            confidence = r.confidence(),
            chars = r.text().len(),
            "pass complete"
        ),
        Err(e) => tracing::warn!(
            pass = outcome.index,
            variant = %outcome.variant,
            error = %e,
            "pass failed, continuing"
        ),
    }
    progress.notify(Progress::new(
        ScanStage::Recognition { pass: outcome.index, total },
        recognition_fraction(done, total),
    ));
}
