//! 学習パイプライン
//!
//! 読み込み → 分割 → 学習 → テスト評価 → 保存 → グラフ出力 → 新規画像の判定
//! の順で1回実行する。学習済みモデルは戻り値として次の段へ明示的に渡す。

use anyhow::{bail, Context, Result};
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use burn_dataset::Dataset;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::data::{load_dataset, split_dataset, SkippedImage};
use crate::ml::{
    evaluate, predict_directory, train_model, ClassificationReport, ConfusionMatrix, EvaluationResult, ModelConfig,
    TrainingHistory,
};
use crate::model::{save_classifier, AppConfig, ModelMetadata};
use crate::report::{plot_confusion_matrix, plot_metric_curves, write_history_csv};

/// 1回の実行結果
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub history: TrainingHistory,
    pub test: EvaluationResult,
    pub report: ClassificationReport,
    pub confusion: ConfusionMatrix,
    /// 保存したモデルアーカイブ
    pub model_path: PathBuf,
    /// 読み込めずにスキップした学習画像
    pub skipped: Vec<SkippedImage>,
    /// 書き出したグラフと履歴CSV
    pub artifacts: Vec<PathBuf>,
    /// 新規画像の判定結果（"Genuine" / "Forged" / "Error: ..."）
    pub predictions: Vec<(PathBuf, String)>,
}

/// 設定に従ってパイプライン全体を実行
pub fn run<B: AutodiffBackend>(config: &AppConfig, device: &B::Device) -> Result<PipelineOutcome> {
    let image_size = config.model.image_size;
    let training = &config.training;

    // 1. 読み込み
    info!("学習データを読み込みます: {}", config.paths.data_dir.display());
    let loaded = load_dataset(&config.paths.data_dir, image_size)?;
    if loaded.dataset.is_empty() {
        bail!("no readable images found under {}", config.paths.data_dir.display());
    }
    let [genuine, forged] = loaded.dataset.class_counts();
    info!(
        "読み込み完了: genuine {} 枚, forged {} 枚, スキップ {} 枚",
        genuine,
        forged,
        loaded.skipped.len()
    );

    // 2. 分割
    let splits = split_dataset(
        loaded.dataset.into_samples(),
        training.test_ratio,
        training.validation_ratio,
        training.seed,
    );
    info!(
        "データ分割: 学習 {} 枚, 検証 {} 枚, テスト {} 枚",
        splits.train.len(),
        splits.validation.len(),
        splits.test.len()
    );

    // 3. 学習
    let model = ModelConfig::new()
        .with_image_size(image_size)
        .with_hidden_units(config.model.hidden_units)
        .init::<B>(device);
    let trained = train_model(model, &splits, training, &config.augmentation, image_size, device)?;
    let history = trained.history;
    let model = trained.model.valid();

    // 4. テスト評価
    let test = evaluate(&model, &splits.test, training.batch_size, image_size, device)?;
    let report = test.report();
    let confusion = test.confusion_matrix();
    info!("テスト評価: {}", test.metrics.summary());

    println!("\n=== テスト評価 ===");
    println!("Test Loss:      {:.4}", test.metrics.loss);
    println!("Test Accuracy:  {:.4}", test.metrics.accuracy);
    println!("Test Precision: {:.4}", test.metrics.precision);
    println!("Test Recall:    {:.4}", test.metrics.recall);
    println!("Test AUC:       {:.4}", test.metrics.auc);
    println!("\n{}", report);
    println!("{}", confusion);

    // 5. 保存
    let metadata = ModelMetadata::new(
        image_size as u32,
        config.model.hidden_units as u32,
        history.epochs_run() as u32,
        history.best_epoch as u32,
    )
    .with_test_metrics(test.metrics);
    let model_path = save_classifier(&model, &metadata, &config.paths.model_path)
        .with_context(|| format!("Failed to save model to {}", config.paths.model_path.display()))?;
    info!("モデルを保存しました: {}", model_path.display());

    // 6. グラフと履歴（失敗しても学習結果は保存済みなので警告に留める）
    let report_dir = &config.paths.report_dir;
    let mut artifacts = Vec::new();
    let history_path = report_dir.join("history.csv");
    match write_history_csv(&history, &history_path) {
        Ok(()) => artifacts.push(history_path),
        Err(e) => warn!("学習履歴を書き出せませんでした: {:#}", e),
    }
    match plot_metric_curves(&history, report_dir) {
        Ok(paths) => artifacts.extend(paths),
        Err(e) => warn!("学習曲線を描画できませんでした: {:#}", e),
    }
    let confusion_path = report_dir.join("confusion_matrix.svg");
    match plot_confusion_matrix(&confusion, &confusion_path) {
        Ok(()) => artifacts.push(confusion_path),
        Err(e) => warn!("混同行列を描画できませんでした: {:#}", e),
    }
    info!("レポートを出力しました: {} ファイル ({})", artifacts.len(), report_dir.display());

    // 7. 新規画像の判定
    let image_dir = &config.paths.image_dir;
    let predictions = if image_dir.is_dir() {
        let predictions = predict_directory(&model, image_dir, image_size, device)?;
        println!("\n=== 判定結果 ({}) ===", image_dir.display());
        for (path, verdict) in &predictions {
            println!("{}: {}", path.display(), verdict);
        }
        predictions
    } else {
        warn!("判定対象ディレクトリが見つかりません: {}", image_dir.display());
        Vec::new()
    };

    Ok(PipelineOutcome {
        history,
        test,
        report,
        confusion,
        model_path,
        skipped: loaded.skipped,
        artifacts,
        predictions,
    })
}
