pub mod model_metadata;
pub mod model_storage;
pub mod config;

pub use model_metadata::ModelMetadata;
pub use model_storage::{
    archive_path, load_classifier, load_metadata, load_model_binary, print_metadata_info, save_classifier,
    save_model_with_metadata,
};
pub use config::{AppConfig, ConfigOrigin, DeviceType, ModelSettings, PathSettings, TrainingSettings};
