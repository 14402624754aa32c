use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ScanStage {
    Decode,
    Orientation,
    Filtering,
    Recognition { pass: usize, total: usize },
    Fusion,
    Normalization,
    Done,
    /// The scan failed or was cancelled; observers should clear any indicator.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    #[serde(flatten)]
    pub stage: ScanStage,
    /// Overall completion in `0.0..=1.0`.
    pub fraction: f32,
}

impl Progress {
    pub fn new(stage: ScanStage, fraction: f32) -> Self {
        Self { stage, fraction: fraction.clamp(0.0, 1.0) }
    }

    pub fn reset() -> Self {
        Self { stage: ScanStage::Reset, fraction: 0.0 }
    }
}

/// Fire-and-forget progress observer. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, progress: Progress);
}

/// Discards every notification.
impl ProgressSink for () {
    fn notify(&self, _progress: Progress) {}
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(Progress) + Send + Sync,
{
    fn notify(&self, progress: Progress) {
        (self.0)(progress)
    }
}

impl ProgressSink for mpsc::UnboundedSender<Progress> {
    fn notify(&self, progress: Progress) {
        // A closed receiver just means nobody is watching anymore.
        let _ = self.send(progress);
    }
}

impl ProgressSink for mpsc::Sender<Progress> {
    fn notify(&self, progress: Progress) {
        if let Err(mpsc::error::TrySendError::Full(p)) = self.try_send(progress) {
            tracing::trace!(stage = ?p.stage, "progress channel full, dropping update");
        }
    }
}
