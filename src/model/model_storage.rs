//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス順、入力サイズ、評価値など）
//! - model.bin       - モデルの重み（BinBytesRecorder, f32精度）

use anyhow::{anyhow, bail, Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::ml::{ModelConfig, SignatureClassifier};
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const WEIGHTS_ENTRY: &str = "model.bin";

/// 保存先のパスを .tar.gz に揃える
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// # 戻り値
/// - 実際に書き込んだパス
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, WEIGHTS_ENTRY, model_binary)?;

    // tarとgzipの両方を書き切る
    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;

    Ok(tar_gz_path)
}

/// アーカイブから指定のエントリを読む
fn read_entry(tar_gz_path: &Path, name: &str) -> Result<Vec<u8>> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some(name) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            return Ok(buffer);
        }
    }

    Err(anyhow!("{} not found in tar.gz archive", name))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let bytes = read_entry(tar_gz_path, METADATA_ENTRY)?;
    let json_str = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json_str)
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    read_entry(tar_gz_path, WEIGHTS_ENTRY)
}

/// 学習済みモデルをメタデータと共に保存
pub fn save_classifier<B: Backend>(
    model: &SignatureClassifier<B>,
    metadata: &ModelMetadata,
    output_path: &Path,
) -> Result<PathBuf> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = Recorder::<B>::record(&recorder, model.clone().into_record(), ())
        .map_err(|e| anyhow!("Failed to serialize model weights: {:?}", e))?;

    save_model_with_metadata(output_path, metadata, &model_binary)
}

/// 保存済みモデルを復元
///
/// メタデータの入力サイズ・クラス数でモデルを組み立ててから重みを読み込む。
pub fn load_classifier<B: Backend>(
    tar_gz_path: &Path,
    device: &B::Device,
) -> Result<(SignatureClassifier<B>, ModelMetadata)> {
    let metadata = load_metadata(tar_gz_path)?;
    let config = ModelConfig::new()
        .with_num_classes(metadata.num_classes())
        .with_image_size(metadata.image_size as usize)
        .with_hidden_units(metadata.hidden_units as usize);

    // 壊れたメタデータでモデル初期化がpanicしないよう先に弾く
    if config.num_classes == 0 {
        bail!("invalid metadata in {:?}: no class labels", tar_gz_path);
    }
    if config.hidden_units == 0 {
        bail!("invalid metadata in {:?}: hidden_units must be positive", tar_gz_path);
    }
    if config.feature_map_size() == 0 {
        bail!(
            "invalid metadata in {:?}: image_size {} is too small",
            tar_gz_path,
            metadata.image_size
        );
    }

    let model_binary = load_model_binary(tar_gz_path)?;
    let model = config.init::<B>(device);

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = Recorder::<B>::load(&recorder, model_binary, device)
        .map_err(|e| anyhow!("Failed to load model weights: {:?}", e))?;

    Ok((model.load_record(record), metadata))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラス: {}", metadata.class_labels.join(", "));
    println!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    println!("隠れ層ユニット数: {}", metadata.hidden_units);
    println!("学習エポック数: {} (最良: {})", metadata.epochs_run, metadata.best_epoch);
    if let Some(metrics) = &metadata.test_metrics {
        println!("テスト評価: {}", metrics.summary());
    }
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}
