//! 機械学習モデルの共通定義
//!
//! 署名画像（グレースケール）を genuine / forged に分類するCNNモデルと、
//! 画像の前処理を提供します。

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::{imageops::FilterType, GrayImage};

use crate::types::NUM_CLASSES;

/// 画像サイズ（正方形）
pub const IMAGE_SIZE: usize = 128;

/// 入力チャネル数（グレースケール）
pub const IMAGE_CHANNELS: usize = 1;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    #[config(default = 2)]
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 128)]
    pub image_size: usize,
    /// 全結合隠れ層のユニット数
    #[config(default = 64)]
    pub hidden_units: usize,
}

impl ModelConfig {
    /// 最後の畳み込み層の出力マップの一辺
    ///
    /// Conv(3x3, no padding) は一辺を2減らし、Pool(2x2, stride 2) は半分にする（切り捨て）。
    pub fn feature_map_size(&self) -> usize {
        let after_conv1 = self.image_size.saturating_sub(2);
        let after_pool1 = after_conv1 / 2;
        let after_conv2 = after_pool1.saturating_sub(2);
        let after_pool2 = after_conv2 / 2;
        after_pool2.saturating_sub(2)
    }

    /// Flatten後の特徴次元
    pub fn flattened_features(&self) -> usize {
        let size = self.feature_map_size();
        64 * size * size
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> SignatureClassifier<B> {
        let feature_map_size = self.feature_map_size();
        if feature_map_size == 0 {
            panic!("input size too small: {} (at least 18x18 required)", self.image_size);
        }

        let d = self.flattened_features();
        tracing::debug!(
            "[Model] 入力: {}x{}x{}, Conv3後: 64 x {}x{}, Flatten後: {}, FC1: {} -> {}, FC2: {} -> {}",
            IMAGE_CHANNELS,
            self.image_size,
            self.image_size,
            feature_map_size,
            feature_map_size,
            d,
            d,
            self.hidden_units,
            self.hidden_units,
            self.num_classes
        );

        SignatureClassifier {
            conv1: Conv2dConfig::new([IMAGE_CHANNELS, 32], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            conv3: Conv2dConfig::new([64, 64], [3, 3])
                .with_stride([1, 1])
                .init(device),

            fc1: LinearConfig::new(d, self.hidden_units).init(device),
            fc2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),

            activation: Relu::new(),
        }
    }
}

/// 署名分類用CNNモデル
///
/// # アーキテクチャ
/// - Conv 3x3 (32) + ReLU → MaxPool 2x2
/// - Conv 3x3 (64) + ReLU → MaxPool 2x2
/// - Conv 3x3 (64) + ReLU
/// - Flatten
/// - FC: d -> 64 + ReLU
/// - FC: 64 -> 2
/// - Softmax (推論・評価時)
#[derive(Module, Debug)]
pub struct SignatureClassifier<B: Backend> {
    conv1: Conv2d<B>, // 1 -> 32
    pool1: MaxPool2d,
    conv2: Conv2d<B>, // 32 -> 64
    pool2: MaxPool2d,
    conv3: Conv2d<B>, // 64 -> 64

    fc1: Linear<B>, // d -> 64
    fc2: Linear<B>, // 64 -> num_classes

    activation: Relu,
}

impl<B: Backend> SignatureClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 1, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// クラス確率 [batch_size, num_classes]
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 予測を実行
    ///
    /// # 戻り値
    /// - (予測クラスID, クラス確率)
    pub fn predict(&self, images: Tensor<B, 4>) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
        let probabilities = self.forward_probabilities(images);
        let predictions = probabilities.clone().argmax(1);
        (predictions, probabilities)
    }

    /// 順伝播と損失計算（学習・評価用）
    ///
    /// 損失はロジットに対するカテゴリカル交差エントロピー。
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// 画像前処理のエラー
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("unreadable image {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image has no pixels: {width}x{height}")]
    Empty { width: u32, height: u32 },
    #[error("resize failed: got {width}x{height}, expected {expected}x{expected}")]
    Resize { width: u32, height: u32, expected: usize },
}

/// 画像をグレースケールで読み込み、リサイズして [0,1] に正規化
///
/// # 戻り値
/// - 行優先で平坦化した `size * size` 個の画素値
pub fn load_and_normalize_image(path: &Path, size: usize) -> Result<Vec<f32>, PreprocessError> {
    let img = image::open(path)
        .map_err(|source| PreprocessError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_luma8();

    normalize_gray_image(&img, size)
}

/// デコード済みのグレースケール画像をリサイズして正規化
pub fn normalize_gray_image(img: &GrayImage, size: usize) -> Result<Vec<f32>, PreprocessError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessError::Empty { width, height });
    }

    let resized = image::imageops::resize(img, size as u32, size as u32, FilterType::Triangle);
    let (width, height) = resized.dimensions();
    if width != size as u32 || height != size as u32 {
        return Err(PreprocessError::Resize {
            width,
            height,
            expected: size,
        });
    }

    Ok(resized.pixels().map(|pixel| pixel[0] as f32 / 255.0).collect())
}

/// 既定のクラス数と画像サイズのモデル設定
pub fn default_model_config() -> ModelConfig {
    ModelConfig::new()
        .with_num_classes(NUM_CLASSES)
        .with_image_size(IMAGE_SIZE)
}
