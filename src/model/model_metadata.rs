//! モデルメタデータの定義
//!
//! tar.gz形式のモデルアーカイブに重みと一緒に保存され、
//! 推論時のクラス順と入力サイズの復元に使われます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::MetricSet;
use crate::types::SignatureClass;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（モデル出力の列順）
    /// 例: ["Genuine", "Forged"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形、通常128）
    pub image_size: u32,

    /// 全結合隠れ層のユニット数
    pub hidden_units: u32,

    /// 実際に学習したエポック数（早期終了を含む）
    pub epochs_run: u32,

    /// 復元したパラメータのエポック
    pub best_epoch: u32,

    /// テストデータでの評価値
    #[serde(default)]
    pub test_metrics: Option<MetricSet>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(image_size: u32, hidden_units: u32, epochs_run: u32, best_epoch: u32) -> Self {
        Self {
            class_labels: SignatureClass::ALL.iter().map(|c| c.label().to_string()).collect(),
            image_size,
            hidden_units,
            epochs_run,
            best_epoch,
            test_metrics: None,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn with_test_metrics(mut self, metrics: MetricSet) -> Self {
        self.test_metrics = Some(metrics);
        self
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metadata() {
        let metadata = ModelMetadata::new(128, 64, 12, 7);
        assert_eq!(metadata.class_labels, vec!["Genuine", "Forged"]);
        assert_eq!(metadata.num_classes(), 2);
        assert!(chrono::DateTime::parse_from_rfc3339(&metadata.trained_at).is_ok());
    }

    #[test]
    fn test_json_round_trip_with_metrics() {
        let metrics = MetricSet {
            loss: 0.25,
            accuracy: 0.75,
            precision: 0.5,
            recall: 1.0,
            auc: 0.875,
        };
        let metadata = ModelMetadata::new(128, 64, 12, 7).with_test_metrics(metrics);
        let json = metadata.to_json_string().unwrap();
        assert_eq!(ModelMetadata::from_json_string(&json).unwrap(), metadata);
    }

    #[test]
    fn test_missing_metrics_field() {
        let json = r#"{
            "class_labels": ["Genuine", "Forged"],
            "image_size": 128,
            "hidden_units": 64,
            "epochs_run": 3,
            "best_epoch": 2,
            "trained_at": "2026-01-01T00:00:00+00:00"
        }"#;
        let metadata = ModelMetadata::from_json_string(json).unwrap();
        assert!(metadata.test_metrics.is_none());
    }
}
