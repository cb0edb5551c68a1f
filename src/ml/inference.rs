//! モデル推論機能

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use burn::tensor::{backend::Backend, Tensor};

use crate::data::loader::list_files;
use crate::ml::{load_and_normalize_image, SignatureClassifier};
use crate::model::{load_classifier, ModelMetadata};
use crate::types::{SignatureClass, NUM_CLASSES};

/// 推論対象とする拡張子
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 2クラスの確率から判定する（genuine の確率が forged より大きければ Genuine）
pub fn verdict_from_probabilities(probabilities: [f32; NUM_CLASSES]) -> SignatureClass {
    if probabilities[0] > probabilities[1] {
        SignatureClass::Genuine
    } else {
        SignatureClass::Forged
    }
}

/// 単一画像を分類
///
/// # 戻り値
/// - (判定, [genuineの確率, forgedの確率])
pub fn classify<B: Backend>(
    model: &SignatureClassifier<B>,
    path: &Path,
    image_size: usize,
    device: &B::Device,
) -> Result<(SignatureClass, [f32; NUM_CLASSES])> {
    let pixels = load_and_normalize_image(path, image_size)?;

    // [1, 1, size, size] の1枚バッチ
    let tensor = Tensor::<B, 1>::from_floats(pixels.as_slice(), device).reshape([1, 1, image_size, image_size]);
    let probabilities = model
        .forward_probabilities(tensor)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("failed to read prediction: {:?}", e))?;

    match probabilities.as_slice() {
        [genuine, forged] => {
            let probabilities = [*genuine, *forged];
            Ok((verdict_from_probabilities(probabilities), probabilities))
        }
        other => Err(anyhow!("unexpected model output length: {}", other.len())),
    }
}

/// 単一画像を判定し、結果を文字列で返す
///
/// 読み込み・リサイズ・推論のいずれで失敗しても例外にせず `"Error: ..."` を返す。
pub fn predict_signature<B: Backend>(
    model: &SignatureClassifier<B>,
    path: &Path,
    image_size: usize,
    device: &B::Device,
) -> String {
    match classify(model, path, image_size, device) {
        Ok((verdict, _)) => verdict.to_string(),
        Err(e) => format!("Error: {:#}", e),
    }
}

/// ディレクトリ内の画像ファイル（jpg / jpeg / png）をパス順で列挙
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_files(dir)?
        .into_iter()
        .filter(|path| {
            path.extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    IMAGE_EXTENSIONS.contains(&ext.as_str())
                })
                .unwrap_or(false)
        })
        .collect())
}

/// ディレクトリ内の画像をまとめて判定
///
/// 1枚の失敗で全体を止めず、その画像の結果を `"Error: ..."` にする。
pub fn predict_directory<B: Backend>(
    model: &SignatureClassifier<B>,
    dir: &Path,
    image_size: usize,
    device: &B::Device,
) -> Result<Vec<(PathBuf, String)>> {
    Ok(list_image_files(dir)?
        .into_iter()
        .map(|path| {
            let verdict = predict_signature(model, &path, image_size, device);
            (path, verdict)
        })
        .collect())
}

/// 推論エンジン
///
/// 保存済みのモデルアーカイブを読み込み、メタデータの画像サイズで推論する。
pub struct InferenceEngine<B: Backend> {
    model: SignatureClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (model, metadata) = load_classifier::<B>(model_path.as_ref(), &device)?;
        Ok(Self {
            model,
            metadata,
            device,
        })
    }

    fn image_size(&self) -> usize {
        self.metadata.image_size as usize
    }

    pub fn classify<P: AsRef<Path>>(&self, image_path: P) -> Result<(SignatureClass, [f32; NUM_CLASSES])> {
        classify(&self.model, image_path.as_ref(), self.image_size(), &self.device)
    }

    pub fn predict_signature<P: AsRef<Path>>(&self, image_path: P) -> String {
        predict_signature(&self.model, image_path.as_ref(), self.image_size(), &self.device)
    }

    pub fn predict_directory<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<(PathBuf, String)>> {
        predict_directory(&self.model, dir.as_ref(), self.image_size(), &self.device)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ModelConfig;
    use crate::model::save_classifier;
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, Luma};

    type TestBackend = NdArray<f32>;

    const SIZE: usize = 24;

    fn model() -> SignatureClassifier<TestBackend> {
        ModelConfig::new().with_image_size(SIZE).init::<TestBackend>(&Default::default())
    }

    #[test]
    fn test_verdict_from_probabilities() {
        assert_eq!(verdict_from_probabilities([0.9, 0.1]).to_string(), "Genuine");
        assert_eq!(verdict_from_probabilities([0.2, 0.8]).to_string(), "Forged");
        assert_eq!(verdict_from_probabilities([0.5, 0.5]), SignatureClass::Forged);
    }

    #[test]
    fn test_predict_signature_nonexistent_path() {
        let result = predict_signature(&model(), Path::new("/no/such/signature.jpg"), SIZE, &Default::default());
        assert!(result.starts_with("Error:"), "got {result}");
    }

    #[test]
    fn test_predict_signature_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        let result = predict_signature(&model(), &path, SIZE, &Default::default());
        assert!(result.starts_with("Error:"));
    }

    #[test]
    fn test_engine_loads_archive_and_classifies() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let metadata = ModelMetadata::new(SIZE as u32, 64, 1, 1);
        let archive = save_classifier(&model(), &metadata, &dir.path().join("model.tar.gz")).unwrap();

        let image = dir.path().join("sig.png");
        ImageBuffer::from_pixel(50, 20, Luma([200u8])).save(&image).unwrap();

        let engine = InferenceEngine::<TestBackend>::load(&archive, device).unwrap();
        assert_eq!(engine.metadata(), &metadata);

        let (verdict, probabilities) = engine.classify(&image).unwrap();
        assert!((probabilities[0] + probabilities[1] - 1.0).abs() < 1e-5);
        assert_eq!(verdict, verdict_from_probabilities(probabilities));
        assert_eq!(engine.predict_signature(&image), verdict.to_string());

        assert!(engine.classify(dir.path().join("missing.png")).is_err());
        assert!(engine.predict_signature(dir.path().join("missing.png")).starts_with("Error:"));
    }

    #[test]
    fn test_predict_directory_filters_and_reports_each_image() {
        let dir = tempfile::tempdir().unwrap();
        ImageBuffer::from_pixel(40, 30, Luma([120u8])).save(dir.path().join("b.jpg")).unwrap();
        ImageBuffer::from_pixel(40, 30, Luma([10u8])).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("c.jpg"), b"broken").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let results = predict_directory(&model(), dir.path(), SIZE, &Default::default()).unwrap();
        let names: Vec<String> = results
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.jpg", "c.jpg"]);

        assert!(results[0].1 == "Genuine" || results[0].1 == "Forged");
        assert!(results[1].1 == "Genuine" || results[1].1 == "Forged");
        assert!(results[2].1.starts_with("Error:"));
    }
}
