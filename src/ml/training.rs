//! モデル学習と評価

use anyhow::{anyhow, Result};
use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use burn_dataset::Dataset;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::{AugmentationConfig, AugmentedFlow, Augmenter, DatasetSplits, SignatureDataset, SignatureSample};
use crate::ml::metrics::{predicted_class, ClassificationReport, ConfusionMatrix, MetricSet};
use crate::ml::SignatureClassifier;
use crate::model::config::TrainingSettings;
use crate::types::NUM_CLASSES;

/// バッチャー
///
/// 正規化済みサンプルをまとめて [batch, 1, size, size] のテンソルにする。
#[derive(Clone, Debug)]
pub struct SignatureBatcher {
    image_size: usize,
}

impl SignatureBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }

    pub fn make_batch<B: Backend>(&self, items: Vec<SignatureSample>, device: &B::Device) -> SignatureBatch<B> {
        Batcher::<B, SignatureSample, SignatureBatch<B>>::batch(self, items, device)
    }
}

impl<B: Backend> Batcher<B, SignatureSample, SignatureBatch<B>> for SignatureBatcher {
    fn batch(&self, items: Vec<SignatureSample>, device: &B::Device) -> SignatureBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * size * size);
        let mut targets_vec = Vec::with_capacity(batch_size);
        let mut labels = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&item.pixels);
            targets_vec.push(item.label as i64);
            labels.push(item.label);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, 1, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);

        SignatureBatch { images, targets, labels }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct SignatureBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
    /// メトリクス計算用（CPU側）のラベル
    pub labels: Vec<usize>,
}

fn probabilities_to_vec<B: Backend>(probabilities: Tensor<B, 2>) -> Result<Vec<[f32; NUM_CLASSES]>> {
    let values = probabilities
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("failed to read probabilities: {:?}", e))?;

    Ok(values
        .chunks_exact(NUM_CLASSES)
        .map(|chunk| [chunk[0], chunk[1]])
        .collect())
}

/// 早期終了の判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStoppingAction {
    /// 監視値が改善した（このエポックのパラメータを保持する）
    Improved,
    Continue,
    Stop,
}

/// 検証損失を監視する早期終了
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best_loss: f64,
    best_epoch: usize,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience: patience.max(1),
            min_delta: 0.0,
            best_loss: f64::INFINITY,
            best_epoch: 0,
            wait: 0,
        }
    }

    pub fn update(&mut self, epoch: usize, loss: f64) -> EarlyStoppingAction {
        if loss < self.best_loss - self.min_delta {
            self.best_loss = loss;
            self.best_epoch = epoch;
            self.wait = 0;
            return EarlyStoppingAction::Improved;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            EarlyStoppingAction::Stop
        } else {
            EarlyStoppingAction::Continue
        }
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }
}

/// 履歴から取り出す指標
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Loss,
    Accuracy,
    Precision,
    Recall,
    Auc,
}

impl Metric {
    /// グラフ出力する指標
    pub const PLOTTED: [Metric; 4] = [Metric::Accuracy, Metric::Precision, Metric::Recall, Metric::Auc];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Loss => "loss",
            Metric::Accuracy => "accuracy",
            Metric::Precision => "precision",
            Metric::Recall => "recall",
            Metric::Auc => "auc",
        }
    }

    pub fn value(self, metrics: &MetricSet) -> f64 {
        match self {
            Metric::Loss => metrics.loss,
            Metric::Accuracy => metrics.accuracy,
            Metric::Precision => metrics.precision,
            Metric::Recall => metrics.recall,
            Metric::Auc => metrics.auc,
        }
    }
}

/// 1エポック分の記録
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train: MetricSet,
    pub validation: MetricSet,
}

/// 学習履歴
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    /// 検証損失が最小だったエポック（1始まり、未学習なら0）
    pub best_epoch: usize,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn epochs_run(&self) -> usize {
        self.epochs.len()
    }

    pub fn best(&self) -> Option<&EpochRecord> {
        self.epochs.iter().find(|record| record.epoch == self.best_epoch)
    }

    /// エポックごとの値の列
    pub fn series(&self, metric: Metric, validation: bool) -> Vec<f64> {
        self.epochs
            .iter()
            .map(|record| {
                let set = if validation { &record.validation } else { &record.train };
                metric.value(set)
            })
            .collect()
    }
}

/// 学習済みモデルと履歴
pub struct TrainedModel<B: AutodiffBackend> {
    pub model: SignatureClassifier<B>,
    pub history: TrainingHistory,
}

/// 評価結果
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub metrics: MetricSet,
    pub probabilities: Vec<[f32; NUM_CLASSES]>,
    pub labels: Vec<usize>,
    pub predictions: Vec<usize>,
}

impl EvaluationResult {
    pub fn confusion_matrix(&self) -> ConfusionMatrix {
        ConfusionMatrix::from_labels(&self.labels, &self.predictions)
    }

    pub fn report(&self) -> ClassificationReport {
        ClassificationReport::from_labels(&self.labels, &self.predictions)
    }
}

/// データセット全体で損失と指標を計算（順伝播のみ）
pub fn evaluate<B: Backend>(
    model: &SignatureClassifier<B>,
    dataset: &SignatureDataset,
    batch_size: usize,
    image_size: usize,
    device: &B::Device,
) -> Result<EvaluationResult> {
    let batcher = SignatureBatcher::new(image_size);
    let mut loss_sum = 0.0;
    let mut probabilities = Vec::with_capacity(dataset.len());
    let mut labels = Vec::with_capacity(dataset.len());

    for chunk in dataset.samples().chunks(batch_size.max(1)) {
        let batch = batcher.make_batch::<B>(chunk.to_vec(), device);
        let output = model.forward_classification(batch.images, batch.targets);
        loss_sum += output.loss.into_scalar().elem::<f64>() * chunk.len() as f64;
        probabilities.extend(probabilities_to_vec(softmax(output.output, 1))?);
        labels.extend(batch.labels);
    }

    let loss = if labels.is_empty() { 0.0 } else { loss_sum / labels.len() as f64 };
    let predictions = probabilities.iter().map(predicted_class).collect();

    Ok(EvaluationResult {
        metrics: MetricSet::compute(loss, &probabilities, &labels),
        probabilities,
        labels,
        predictions,
    })
}

/// モデル学習を実行
///
/// 拡張済みの学習バッチで最大 `num_epochs` エポック学習し、エポックごとに検証損失を監視する。
/// `patience` エポック改善が無ければ打ち切り、検証損失が最小だったエポックのパラメータを返す。
pub fn train_model<B: AutodiffBackend>(
    model: SignatureClassifier<B>,
    splits: &DatasetSplits,
    settings: &TrainingSettings,
    augmentation: &AugmentationConfig,
    image_size: usize,
    device: &B::Device,
) -> Result<TrainedModel<B>> {
    let mut flow = AugmentedFlow::new(
        splits.train.clone(),
        Augmenter::new(augmentation.clone()),
        image_size,
        settings.batch_size,
        settings.seed,
    );
    if flow.num_samples() == 0 {
        anyhow::bail!("training set is empty");
    }
    if splits.validation.is_empty() {
        warn!("検証データが空のため、学習損失で早期終了を判定します");
    }

    let steps_per_epoch = flow.steps_per_epoch();
    info!(
        "学習を開始します: 学習 {} 枚, 検証 {} 枚, エポック数 {}, バッチサイズ {}, 学習率 {}",
        flow.num_samples(),
        splits.validation.len(),
        settings.num_epochs,
        flow.batch_size(),
        settings.learning_rate
    );
    info!("データ拡張: {}", augmentation.describe());

    let batcher = SignatureBatcher::new(image_size);
    let mut optimizer = AdamConfig::new().init();
    let mut early_stopping = EarlyStopping::new(settings.patience);
    let mut model = model;
    let mut best_model = model.clone();
    let mut history = TrainingHistory::default();

    for epoch in 1..=settings.num_epochs {
        let mut loss_sum = 0.0;
        let mut probabilities = Vec::with_capacity(flow.num_samples());
        let mut labels = Vec::with_capacity(flow.num_samples());

        for (step, items) in flow.by_ref().take(steps_per_epoch).enumerate() {
            let batch = batcher.make_batch::<B>(items, device);
            let batch_len = batch.labels.len();

            let output = model.forward_classification(batch.images, batch.targets);
            let loss_value = output.loss.clone().into_scalar().elem::<f64>();
            let batch_probs = probabilities_to_vec(softmax(output.output.detach(), 1))?;

            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optimizer.step(settings.learning_rate, model, grads);

            loss_sum += loss_value * batch_len as f64;
            probabilities.extend(batch_probs);
            labels.extend(batch.labels);
            debug!("Epoch {} Batch {}/{}: loss={:.4}", epoch, step + 1, steps_per_epoch, loss_value);
        }

        let train_loss = if labels.is_empty() { 0.0 } else { loss_sum / labels.len() as f64 };
        let train_metrics = MetricSet::compute(train_loss, &probabilities, &labels);

        let validation_metrics = if splits.validation.is_empty() {
            MetricSet::default()
        } else {
            evaluate(&model.valid(), &splits.validation, settings.batch_size, image_size, device)?.metrics
        };

        info!(
            "Epoch {}/{}: train [{}] val [{}]",
            epoch,
            settings.num_epochs,
            train_metrics.summary(),
            validation_metrics.summary()
        );
        history.epochs.push(EpochRecord {
            epoch,
            train: train_metrics,
            validation: validation_metrics,
        });

        let monitored = if splits.validation.is_empty() {
            train_metrics.loss
        } else {
            validation_metrics.loss
        };
        match early_stopping.update(epoch, monitored) {
            EarlyStoppingAction::Improved => best_model = model.clone(),
            EarlyStoppingAction::Continue => {}
            EarlyStoppingAction::Stop => {
                info!(
                    "早期終了: {} エポック改善なし（最良エポック {}）",
                    settings.patience,
                    early_stopping.best_epoch()
                );
                history.stopped_early = true;
                break;
            }
        }
    }

    history.best_epoch = early_stopping.best_epoch();
    if history.best_epoch == 0 {
        // 一度も改善しなかった（損失がNaNなど）場合は最後のパラメータを使う
        warn!("監視値が一度も改善しなかったため、最終エポックのパラメータを使用します");
        best_model = model;
    } else {
        info!(
            "最良エポック {} のパラメータを復元しました（監視損失 {:.4}）",
            history.best_epoch,
            early_stopping.best_loss()
        );
    }

    Ok(TrainedModel {
        model: best_model,
        history,
    })
}
