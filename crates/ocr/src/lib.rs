pub mod assess;
pub mod digest;
pub mod filters;
pub mod fusion;
pub mod orchestrator;
pub mod pipeline;
pub mod preprocess;
pub mod profile;
pub mod progress;
pub mod recognizer;
pub mod remote;
pub mod types;

pub use assess::{assess, Assessment};
pub use filters::{FilterBank, FilterError, FilterParams};
pub use fusion::{fuse, FusionMode};
pub use orchestrator::{Orchestrator, PassOutcome};
pub use pipeline::{PassSummary, ScanConfig, ScanError, ScanPipeline, ScanReport};
pub use preprocess::{DecodeError, ImageNormalizer, ImageSource, NormalizedImage};
pub use profile::{PassSpec, ScanProfile};
pub use progress::{FnSink, Progress, ProgressSink, ScanStage};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError, UnavailableRecognizer};
pub use remote::{OcrRequest, OcrResponse, RemoteOcrClient, RemoteScan, RemoteScanner};
pub use types::{
    PageSegMode, PreprocessVariant, RecognitionOptions, RecognitionOverrides, RecognitionResult,
    VariantKind, Word,
};

#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_backend::TesseractRecognizer;
