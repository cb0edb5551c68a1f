//! 学習データの読み込み
//!
//! `<data_dir>/genuine/*` と `<data_dir>/forged/*` を走査し、
//! 読み込めた画像だけを正規化済みサンプルとして返します。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn_dataset::Dataset;
use tracing::{info, warn};

use crate::data::split::one_hot;
use crate::ml::load_and_normalize_image;
use crate::types::{SignatureClass, NUM_CLASSES};

/// 正規化済みの署名画像1枚
#[derive(Debug, Clone)]
pub struct SignatureSample {
    /// 行優先の画素値 [0,1]（size * size 個）
    pub pixels: Vec<f32>,
    /// クラスID（genuine=0, forged=1）
    pub label: usize,
    pub path: PathBuf,
}

impl SignatureSample {
    pub fn one_hot(&self) -> [f32; NUM_CLASSES] {
        one_hot(self.label)
    }
}

/// 読み込めずにスキップした画像
#[derive(Debug, Clone)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: String,
}

/// メモリ上のサンプル集合
#[derive(Debug, Clone, Default)]
pub struct SignatureDataset {
    samples: Vec<SignatureSample>,
}

impl SignatureDataset {
    pub fn new(samples: Vec<SignatureSample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[SignatureSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<SignatureSample> {
        self.samples
    }

    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// クラスごとのサンプル数
    pub fn class_counts(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for sample in &self.samples {
            if let Some(count) = counts.get_mut(sample.label) {
                *count += 1;
            }
        }
        counts
    }
}

impl Dataset<SignatureSample> for SignatureDataset {
    fn get(&self, index: usize) -> Option<SignatureSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// 読み込み結果
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub dataset: SignatureDataset,
    pub skipped: Vec<SkippedImage>,
}

/// ディレクトリ直下のファイルをパス順で列挙（サブディレクトリは無視）
pub(crate) fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// genuine / forged フォルダから学習データを読み込む
///
/// 読み込めない画像は警告ログを1件出してスキップする。
/// クラスフォルダ自体が存在しない場合はエラー。
pub fn load_dataset(data_dir: &Path, image_size: usize) -> Result<LoadedDataset> {
    let mut samples = Vec::new();
    let mut skipped = Vec::new();

    for class in SignatureClass::ALL {
        let class_dir = data_dir.join(class.folder_name());
        let files = list_files(&class_dir)?;

        let before = samples.len();
        for path in files {
            match load_and_normalize_image(&path, image_size) {
                Ok(pixels) => samples.push(SignatureSample {
                    pixels,
                    label: class.index(),
                    path,
                }),
                Err(e) => {
                    warn!("画像を読み込めませんでした: {} ({})", path.display(), e);
                    skipped.push(SkippedImage {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("  クラス '{}': {} 枚", class.folder_name(), samples.len() - before);
    }

    info!(
        "{} 枚の画像を読み込みました（スキップ: {} 枚）",
        samples.len(),
        skipped.len()
    );

    Ok(LoadedDataset {
        dataset: SignatureDataset::new(samples),
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn write_gray(path: &Path, value: u8, size: u32) {
        ImageBuffer::from_pixel(size, size, Luma([value])).save(path).unwrap();
    }

    fn make_data_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let genuine = dir.path().join("genuine");
        let forged = dir.path().join("forged");
        std::fs::create_dir_all(&genuine).unwrap();
        std::fs::create_dir_all(&forged).unwrap();

        write_gray(&genuine.join("a.png"), 10, 64);
        write_gray(&genuine.join("b.png"), 200, 200);
        write_gray(&forged.join("c.png"), 90, 128);
        std::fs::write(forged.join("corrupt.jpg"), b"garbage").unwrap();
        dir
    }

    #[test]
    fn test_load_dataset_labels_and_order() {
        let dir = make_data_dir();
        let loaded = load_dataset(dir.path(), 128).unwrap();

        assert_eq!(loaded.dataset.len(), 3);
        assert_eq!(loaded.dataset.labels(), vec![0, 0, 1]);
        assert_eq!(loaded.dataset.class_counts(), [2, 1]);
        for sample in loaded.dataset.samples() {
            assert_eq!(sample.pixels.len(), 128 * 128);
            assert!(sample.pixels.iter().all(|v| (0.0..=1.0).contains(v)));
        }
        assert_eq!(loaded.skipped.len(), 1);
        assert!(loaded.skipped[0].path.ends_with("corrupt.jpg"));
    }

    #[test]
    fn test_unreadable_file_logs_one_warning() {
        let dir = make_data_dir();
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();

        let loaded = tracing::subscriber::with_default(subscriber, || load_dataset(dir.path(), 32)).unwrap();

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let warnings: Vec<&str> = output.lines().filter(|line| line.contains("WARN")).collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("corrupt.jpg"));
        assert_eq!(loaded.dataset.len(), 3);
    }

    #[test]
    fn test_missing_class_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("genuine")).unwrap();
        assert!(load_dataset(dir.path(), 128).is_err());
    }
}
