pub mod loader;
pub mod split;
pub mod augment;

pub use loader::{load_dataset, LoadedDataset, SignatureDataset, SignatureSample, SkippedImage};
pub use split::{one_hot, split_dataset, train_test_split, DatasetSplits};
pub use augment::{AffineTransform, AugmentationConfig, AugmentedFlow, Augmenter, FillMode};
