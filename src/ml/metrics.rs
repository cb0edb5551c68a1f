//! 分類メトリクス
//!
//! 学習中に追跡する指標（accuracy / precision / recall / AUC）と、
//! 評価時の混同行列・クラス別レポートを計算します。
//! 分母が0になる場合はエラーにせず 0.0 とします。

use serde::{Deserialize, Serialize};

use crate::types::{SignatureClass, NUM_CLASSES};

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// 確率が最大のクラス（同値なら小さいインデックス）
pub fn predicted_class(probabilities: &[f32; NUM_CLASSES]) -> usize {
    let mut best = 0;
    for (idx, p) in probabilities.iter().enumerate() {
        if *p > probabilities[best] {
            best = idx;
        }
    }
    best
}

/// 学習中に追跡する指標
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSet {
    pub loss: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub auc: f64,
}

impl MetricSet {
    /// 確率とラベルから指標を計算
    ///
    /// precision / recall は one-hot の各列を閾値0.5の2値判定とみなし、
    /// 全列をまとめて（マイクロ平均で）数える。AUC も one-hot を平坦化して計算する。
    pub fn compute(loss: f64, probabilities: &[[f32; NUM_CLASSES]], labels: &[usize]) -> Self {
        let total = probabilities.len().min(labels.len());
        let mut correct = 0usize;
        let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
        let mut scores = Vec::with_capacity(total * NUM_CLASSES);
        let mut targets = Vec::with_capacity(total * NUM_CLASSES);

        for (probs, &label) in probabilities.iter().zip(labels) {
            if predicted_class(probs) == label {
                correct += 1;
            }
            for (class_idx, &p) in probs.iter().enumerate() {
                let actual = class_idx == label;
                let predicted = p > 0.5;
                match (actual, predicted) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
                scores.push(p as f64);
                targets.push(actual);
            }
        }

        Self {
            loss,
            accuracy: safe_div(correct as f64, total as f64),
            precision: safe_div(tp as f64, (tp + fp) as f64),
            recall: safe_div(tp as f64, (tp + fn_) as f64),
            auc: binary_auc(&scores, &targets),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "loss={:.4} accuracy={:.4} precision={:.4} recall={:.4} auc={:.4}",
            self.loss, self.accuracy, self.precision, self.recall, self.auc
        )
    }
}

/// ROC曲線下面積（同スコアはまとめて台形で積分）
///
/// 正例か負例のどちらかが無い場合は 0.5。
pub fn binary_auc(scores: &[f64], targets: &[bool]) -> f64 {
    let mut pairs: Vec<(f64, bool)> = scores.iter().copied().zip(targets.iter().copied()).collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let n_pos = pairs.iter().filter(|(_, t)| *t).count() as f64;
    let n_neg = pairs.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return 0.5;
    }

    let (mut tp, mut fp) = (0.0, 0.0);
    let (mut tpr_prev, mut fpr_prev) = (0.0, 0.0);
    let mut auc = 0.0;

    let mut i = 0;
    while i < pairs.len() {
        let score = pairs[i].0;
        while i < pairs.len() && pairs[i].0 == score {
            if pairs[i].1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let tpr = tp / n_pos;
        let fpr = fp / n_neg;
        auc += (fpr - fpr_prev) * (tpr + tpr_prev) / 2.0;
        tpr_prev = tpr;
        fpr_prev = fpr;
    }

    auc
}

/// 混同行列（行: 正解、列: 予測）
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    counts: [[usize; NUM_CLASSES]; NUM_CLASSES],
}

impl ConfusionMatrix {
    /// 範囲外のラベルは無視する
    pub fn from_labels(y_true: &[usize], y_pred: &[usize]) -> Self {
        let mut counts = [[0; NUM_CLASSES]; NUM_CLASSES];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            if t < NUM_CLASSES && p < NUM_CLASSES {
                counts[t][p] += 1;
            }
        }
        Self { counts }
    }

    pub fn counts(&self) -> &[[usize; NUM_CLASSES]; NUM_CLASSES] {
        &self.counts
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts[actual][predicted]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// 正解がそのクラスの件数
    pub fn support(&self, class_idx: usize) -> usize {
        self.counts[class_idx].iter().sum()
    }

    /// そのクラスと予測された件数
    pub fn predicted_count(&self, class_idx: usize) -> usize {
        self.counts.iter().map(|row| row[class_idx]).sum()
    }

    pub fn correct(&self) -> usize {
        (0..NUM_CLASSES).map(|c| self.counts[c][c]).sum()
    }
}

impl std::fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Confusion Matrix (rows: true, columns: predicted)")?;
        write!(f, "{:>12}", "")?;
        for class in SignatureClass::ALL {
            write!(f, "{:>10}", class.label())?;
        }
        writeln!(f)?;
        for class in SignatureClass::ALL {
            write!(f, "{:>12}", class.label())?;
            for count in self.counts[class.index()] {
                write!(f, "{:>10}", count)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// 1クラス分（または平均）のスコア
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// クラス別の precision / recall / F1 レポート
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_class: Vec<ClassScores>,
    pub accuracy: f64,
    pub macro_avg: ClassScores,
    pub weighted_avg: ClassScores,
}

impl ClassificationReport {
    pub fn from_labels(y_true: &[usize], y_pred: &[usize]) -> Self {
        Self::from_confusion(&ConfusionMatrix::from_labels(y_true, y_pred))
    }

    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let per_class: Vec<ClassScores> = (0..NUM_CLASSES)
            .map(|c| {
                let tp = cm.get(c, c) as f64;
                let precision = safe_div(tp, cm.predicted_count(c) as f64);
                let recall = safe_div(tp, cm.support(c) as f64);
                let f1 = safe_div(2.0 * precision * recall, precision + recall);
                ClassScores {
                    precision,
                    recall,
                    f1,
                    support: cm.support(c),
                }
            })
            .collect();

        let total = cm.total();
        let n = per_class.len() as f64;
        let macro_avg = ClassScores {
            precision: per_class.iter().map(|s| s.precision).sum::<f64>() / n,
            recall: per_class.iter().map(|s| s.recall).sum::<f64>() / n,
            f1: per_class.iter().map(|s| s.f1).sum::<f64>() / n,
            support: total,
        };
        let weighted = |pick: fn(&ClassScores) -> f64| {
            safe_div(
                per_class.iter().map(|s| pick(s) * s.support as f64).sum::<f64>(),
                total as f64,
            )
        };
        let weighted_avg = ClassScores {
            precision: weighted(|s| s.precision),
            recall: weighted(|s| s.recall),
            f1: weighted(|s| s.f1),
            support: total,
        };

        Self {
            accuracy: safe_div(cm.correct() as f64, total as f64),
            per_class,
            macro_avg,
            weighted_avg,
        }
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let row = |f: &mut std::fmt::Formatter<'_>, name: &str, s: &ClassScores| {
            writeln!(
                f,
                "{:>12}{:>10.2}{:>10.2}{:>10.2}{:>10}",
                name, s.precision, s.recall, s.f1, s.support
            )
        };

        writeln!(f, "{:>12}{:>10}{:>10}{:>10}{:>10}", "", "precision", "recall", "f1-score", "support")?;
        writeln!(f)?;
        for (class, scores) in SignatureClass::ALL.iter().zip(&self.per_class) {
            row(f, class.label(), scores)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12}{:>10}{:>10}{:>10.2}{:>10}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_confusion_matrix_counts() {
        let cm = ConfusionMatrix::from_labels(&[0, 0, 1, 1], &[0, 1, 1, 1]);
        assert_eq!(cm.counts(), &[[1, 1], [0, 2]]);
        assert_eq!(cm.total(), 4);
        assert_eq!(cm.support(0), 2);
        assert_eq!(cm.predicted_count(1), 3);
    }

    #[test]
    fn test_report_matches_hand_computation() {
        // 正解 [G, G, F, F] に対して予測 [G, F, F, F]（1件誤分類）
        let report = ClassificationReport::from_labels(&[0, 0, 1, 1], &[0, 1, 1, 1]);

        let genuine = report.per_class[0];
        assert!(close(genuine.precision, 1.0));
        assert!(close(genuine.recall, 0.5));
        assert!(close(genuine.f1, 2.0 / 3.0));
        assert_eq!(genuine.support, 2);

        let forged = report.per_class[1];
        assert!(close(forged.precision, 2.0 / 3.0));
        assert!(close(forged.recall, 1.0));
        assert!(close(forged.f1, 0.8));

        assert!(close(report.accuracy, 0.75));
        assert!(close(report.macro_avg.precision, (1.0 + 2.0 / 3.0) / 2.0));
        assert!(close(report.macro_avg.f1, (2.0 / 3.0 + 0.8) / 2.0));
        assert!(close(report.weighted_avg.recall, 0.75));
    }

    #[test]
    fn test_report_zero_division_is_zero() {
        // forged と予測されたものも、正解が forged のものも無い
        let report = ClassificationReport::from_labels(&[0, 0], &[0, 0]);
        let forged = report.per_class[1];
        assert_eq!(forged.precision, 0.0);
        assert_eq!(forged.recall, 0.0);
        assert_eq!(forged.f1, 0.0);
        assert!(close(report.accuracy, 1.0));

        let empty = ClassificationReport::from_labels(&[], &[]);
        assert_eq!(empty.accuracy, 0.0);
        assert_eq!(empty.weighted_avg.f1, 0.0);
    }

    #[test]
    fn test_report_display() {
        let report = ClassificationReport::from_labels(&[0, 0, 1, 1], &[0, 1, 1, 1]);
        let text = report.to_string();
        assert!(text.contains("Genuine"));
        assert!(text.contains("Forged"));
        assert!(text.contains("macro avg"));
        assert!(text.contains("0.75"));
    }

    #[test]
    fn test_auc() {
        assert!(close(binary_auc(&[0.9, 0.8, 0.3, 0.1], &[true, true, false, false]), 1.0));
        assert!(close(binary_auc(&[0.1, 0.2, 0.8, 0.9], &[true, true, false, false]), 0.0));
        assert!(close(binary_auc(&[0.5, 0.5], &[true, false]), 0.5));
        assert!(close(binary_auc(&[0.9, 0.1], &[true, true]), 0.5));
    }

    #[test]
    fn test_metric_set() {
        let probs = [[0.9, 0.1], [0.4, 0.6], [0.2, 0.8], [0.3, 0.7]];
        let labels = [0, 0, 1, 1];
        let metrics = MetricSet::compute(0.25, &probs, &labels);

        assert!(close(metrics.loss, 0.25));
        assert!(close(metrics.accuracy, 0.75));
        // 列ごとの判定: TP=3, FP=1, FN=1
        assert!(close(metrics.precision, 0.75));
        assert!(close(metrics.recall, 0.75));
        assert!(metrics.auc > 0.5 && metrics.auc <= 1.0);
    }

    #[test]
    fn test_predicted_class() {
        assert_eq!(predicted_class(&[0.9, 0.1]), 0);
        assert_eq!(predicted_class(&[0.2, 0.8]), 1);
        assert_eq!(predicted_class(&[0.5, 0.5]), 0);
    }
}
