//! 学習履歴のCSV出力

use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::path::Path;

use crate::ml::{Metric, TrainingHistory};

const METRICS: [Metric; 5] = [Metric::Loss, Metric::Accuracy, Metric::Precision, Metric::Recall, Metric::Auc];

fn header() -> Vec<String> {
    let mut columns = vec!["epoch".to_string()];
    for prefix in ["train", "val"] {
        for metric in METRICS {
            columns.push(format!("{}_{}", prefix, metric.name()));
        }
    }
    columns
}

/// エポックごとの学習・検証指標をCSVに書き出す
///
/// 列: epoch, train_loss, train_accuracy, ..., val_auc
pub fn write_history_csv(history: &TrainingHistory, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create history CSV: {}", path.display()))?;

    writer.write_record(header())?;
    for record in &history.epochs {
        let mut row = vec![record.epoch.to_string()];
        for set in [&record.train, &record.validation] {
            for metric in METRICS {
                row.push(format!("{:.6}", metric.value(set)));
            }
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;

    Ok(())
}
