//! アプリケーション設定管理モジュール
//!
//! 計算デバイス・入出力パス・学習設定・データ拡張設定をJSON形式で保存・読み込みします。
//! ファイルに無い項目は既定値で補います。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::data::AugmentationConfig;
use crate::ml::IMAGE_SIZE;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 入出力パス
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathSettings {
    /// 学習データのルート（genuine/ と forged/ を含む）
    pub data_dir: PathBuf,
    /// 学習後に判定する画像のディレクトリ
    pub image_dir: PathBuf,
    /// 保存するモデルアーカイブ（.tar.gz）
    pub model_path: PathBuf,
    /// 追記型のログファイル
    pub log_file: PathBuf,
    /// グラフと学習履歴の出力先
    pub report_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/signatures"),
            image_dir: PathBuf::from("data/new_signatures"),
            model_path: PathBuf::from("models/signature_classifier.tar.gz"),
            log_file: PathBuf::from("logs/signature_verifier.log"),
            report_dir: PathBuf::from("reports"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// 全結合隠れ層のユニット数
    pub hidden_units: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            hidden_units: 64,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingSettings {
    /// 最大エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率（Adam）
    pub learning_rate: f64,
    /// 分割・拡張用のランダムシード
    pub seed: u64,
    /// 全体からテスト用に切り出す比率
    pub test_ratio: f64,
    /// 残りから検証用に切り出す比率
    pub validation_ratio: f64,
    /// 検証損失が改善しないまま許容するエポック数
    pub patience: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 30,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
            test_ratio: 0.2,
            validation_ratio: 0.2,
            patience: 5,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// 入出力パス
    pub paths: PathSettings,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// データ拡張設定
    pub augmentation: AugmentationConfig,
}

/// 設定をどこから得たか
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOrigin {
    /// ファイルから読み込んだ
    Loaded(PathBuf),
    /// ファイルが存在しないので既定値
    Missing(PathBuf),
    /// ファイルが壊れていたので既定値
    Invalid(PathBuf, String),
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しないか読めない場合はデフォルト設定を返す
    ///
    /// ロガー初期化前に呼ばれるので、結果は `ConfigOrigin` で返して呼び出し側でログに出す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigOrigin) {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return (Self::default(), ConfigOrigin::Missing(path));
        }
        match Self::load(&path) {
            Ok(config) => (config, ConfigOrigin::Loaded(path)),
            Err(e) => (Self::default(), ConfigOrigin::Invalid(path, e.to_string())),
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出す
    pub fn log_summary(&self) {
        info!("=== アプリケーション設定 ===");
        info!("計算デバイス: {}", self.device_type);
        info!("学習データ: {}", self.paths.data_dir.display());
        info!("判定対象: {}", self.paths.image_dir.display());
        info!("モデル出力: {}", self.paths.model_path.display());
        info!("レポート出力: {}", self.paths.report_dir.display());
        info!(
            "入力サイズ: {}x{}, 隠れ層: {}",
            self.model.image_size, self.model.image_size, self.model.hidden_units
        );
        info!(
            "エポック数: {}, バッチサイズ: {}, 学習率: {}, シード: {}, patience: {}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.seed,
            self.training.patience
        );
        info!(
            "分割比率: test={}, validation={}",
            self.training.test_ratio, self.training.validation_ratio
        );
    }
}
