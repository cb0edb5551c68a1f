pub mod ml_model;
pub mod metrics;
pub mod training;
pub mod inference;

pub use ml_model::{
    default_model_config, load_and_normalize_image, normalize_gray_image, ModelConfig, PreprocessError,
    SignatureClassifier, IMAGE_CHANNELS, IMAGE_SIZE,
};
pub use metrics::{ClassScores, ClassificationReport, ConfusionMatrix, MetricSet};
pub use training::{
    evaluate, train_model, EarlyStopping, EarlyStoppingAction, EpochRecord, EvaluationResult, Metric, SignatureBatch,
    SignatureBatcher, TrainedModel, TrainingHistory,
};
pub use inference::{classify, predict_directory, predict_signature, verdict_from_probabilities, InferenceEngine};

/// CPU (NdArray) バックエンド
pub type CpuBackend = burn_ndarray::NdArray<f32>;
/// CPU学習用の自動微分バックエンド
pub type CpuTrainBackend = burn_autodiff::Autodiff<CpuBackend>;

/// GPU (WGPU) バックエンド
#[cfg(feature = "wgpu")]
pub type GpuBackend = burn_wgpu::Wgpu;
#[cfg(feature = "wgpu")]
pub type GpuTrainBackend = burn_autodiff::Autodiff<GpuBackend>;
