//! 学習曲線と混同行列のグラフ出力（SVG）

use anyhow::{anyhow, Result};
use plotters::prelude::*;
use std::path::{Path, PathBuf};

use crate::ml::{ConfusionMatrix, Metric, TrainingHistory};
use crate::types::{SignatureClass, NUM_CLASSES};

const CURVE_SIZE: (u32, u32) = (800, 500);
const HEATMAP_SIZE: (u32, u32) = (560, 520);

fn draw_err<E: std::fmt::Debug>(what: &'static str) -> impl Fn(E) -> anyhow::Error {
    move |e| anyhow!("failed to {}: {:?}", what, e)
}

/// 指標ごとに学習・検証の推移を1枚ずつ描く
///
/// # 戻り値
/// - 書き出したファイル（`<指標名>.svg`）。履歴が空なら何も書かない
pub fn plot_metric_curves(history: &TrainingHistory, output_dir: &Path) -> Result<Vec<PathBuf>> {
    if history.epochs.is_empty() {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(output_dir)?;

    let mut written = Vec::new();
    for metric in Metric::PLOTTED {
        let path = output_dir.join(format!("{}.svg", metric.name()));
        plot_metric_curve(history, metric, &path)?;
        written.push(path);
    }
    Ok(written)
}

fn plot_metric_curve(history: &TrainingHistory, metric: Metric, path: &Path) -> Result<()> {
    let epochs: Vec<f64> = history.epochs.iter().map(|r| r.epoch as f64).collect();
    let train = history.series(metric, false);
    let validation = history.series(metric, true);
    let last_epoch = epochs.last().copied().unwrap_or(1.0).max(2.0);

    let root = SVGBackend::new(path, CURVE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err("clear canvas"))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption(format!("Model {}", metric.name()), ("sans-serif", 24))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(1f64..last_epoch, 0f64..1.05f64)
        .map_err(draw_err("build chart"))?;

    chart
        .configure_mesh()
        .x_desc("epoch")
        .y_desc(metric.name())
        .draw()
        .map_err(draw_err("draw mesh"))?;

    chart
        .draw_series(LineSeries::new(epochs.iter().copied().zip(train), &BLUE))
        .map_err(draw_err("draw train series"))?
        .label("train")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .draw_series(LineSeries::new(epochs.iter().copied().zip(validation), &RED))
        .map_err(draw_err("draw validation series"))?
        .label("validation")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(draw_err("draw legend"))?;

    root.present().map_err(draw_err("write svg"))?;
    Ok(())
}

/// 件数の多いセルほど濃い青
fn heat_color(count: usize, max: usize) -> RGBColor {
    let t = if max == 0 { 0.0 } else { count as f64 / max as f64 };
    let scale = |light: f64, dark: f64| (light + (dark - light) * t).round() as u8;
    RGBColor(scale(247.0, 8.0), scale(251.0, 48.0), scale(255.0, 107.0))
}

fn class_label(value: &SegmentValue<i32>, reversed: bool) -> String {
    match value {
        SegmentValue::CenterOf(i) => {
            let index = if reversed { NUM_CLASSES as i32 - 1 - i } else { *i };
            SignatureClass::from_index(index as usize)
                .map(|c| c.label().to_string())
                .unwrap_or_default()
        }
        _ => String::new(),
    }
}

/// 混同行列をヒートマップで描く（行: 正解、列: 予測）
pub fn plot_confusion_matrix(matrix: &ConfusionMatrix, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let n = NUM_CLASSES as i32;
    let max = matrix.counts().iter().flatten().copied().max().unwrap_or(0);

    let root = SVGBackend::new(path, HEATMAP_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err("clear canvas"))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption("Confusion Matrix", ("sans-serif", 24))
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d((0..n).into_segmented(), (0..n).into_segmented())
        .map_err(draw_err("build chart"))?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Predicted")
        .y_desc("Actual")
        .x_label_formatter(&|v| class_label(v, false))
        .y_label_formatter(&|v| class_label(v, true))
        .draw()
        .map_err(draw_err("draw mesh"))?;

    // 1行目（Genuine）を上に置くため y を反転
    let cells: Vec<(i32, i32, usize)> = (0..NUM_CLASSES)
        .flat_map(|actual| (0..NUM_CLASSES).map(move |predicted| (actual, predicted)))
        .map(|(actual, predicted)| (predicted as i32, n - 1 - actual as i32, matrix.get(actual, predicted)))
        .collect();

    chart
        .draw_series(cells.iter().map(|&(x, y, count)| {
            Rectangle::new(
                [
                    (SegmentValue::Exact(x), SegmentValue::Exact(y)),
                    (SegmentValue::Exact(x + 1), SegmentValue::Exact(y + 1)),
                ],
                heat_color(count, max).filled(),
            )
        }))
        .map_err(draw_err("draw cells"))?;

    chart
        .draw_series(cells.iter().map(|&(x, y, count)| {
            let color = if max > 0 && count * 2 > max { WHITE } else { BLACK };
            Text::new(
                count.to_string(),
                (SegmentValue::CenterOf(x), SegmentValue::CenterOf(y)),
                ("sans-serif", 28).into_font().color(&color),
            )
        }))
        .map_err(draw_err("draw counts"))?;

    root.present().map_err(draw_err("write svg"))?;
    Ok(())
}
