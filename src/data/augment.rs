//! 学習時のデータ拡張
//!
//! 回転・平行移動・せん断・ズーム・左右反転をランダムに組み合わせた
//! アフィン変換を画像ごとに適用します。

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::loader::{SignatureDataset, SignatureSample};

/// 画像外にはみ出した座標の埋め方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    /// 最も近い端の画素で埋める
    Nearest,
    /// 0.0 で埋める
    Constant,
}

/// データ拡張の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// 回転角の最大値（度、±）
    pub rotation_range: f32,
    /// 横方向シフトの最大値（画像幅に対する比率、±）
    pub width_shift_range: f32,
    /// 縦方向シフトの最大値（画像高さに対する比率、±）
    pub height_shift_range: f32,
    /// せん断角の最大値（ラジアン、±）
    pub shear_range: f32,
    /// ズーム率の最大変化量（±）
    pub zoom_range: f32,
    /// 左右反転を行うか（確率0.5）
    pub horizontal_flip: bool,
    pub fill_mode: FillMode,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 15.0,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            shear_range: 0.1,
            zoom_range: 0.1,
            horizontal_flip: true,
            fill_mode: FillMode::Nearest,
        }
    }
}

impl AugmentationConfig {
    /// 何も変化させない設定
    pub fn identity() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
            fill_mode: FillMode::Nearest,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "rotation=±{:.1}° shift=±{:.2}x±{:.2} shear=±{:.2} zoom=±{:.2} hflip={} fill={:?}",
            self.rotation_range,
            self.width_shift_range,
            self.height_shift_range,
            self.shear_range,
            self.zoom_range,
            self.horizontal_flip,
            self.fill_mode
        )
    }
}

/// 1枚分のアフィン変換
///
/// 出力画素の中心からの相対座標に `matrix` を掛け、`offset` を足したものが入力座標。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub matrix: [[f32; 2]; 2],
    pub offset: [f32; 2],
    pub flip_horizontal: bool,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            matrix: [[1.0, 0.0], [0.0, 1.0]],
            offset: [0.0, 0.0],
            flip_horizontal: false,
        }
    }
}

fn symmetric(rng: &mut impl Rng, limit: f32) -> f32 {
    if limit > 0.0 {
        rng.gen_range(-limit..=limit)
    } else {
        0.0
    }
}

fn mat_mul(a: [[f32; 2]; 2], b: [[f32; 2]; 2]) -> [[f32; 2]; 2] {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}

/// ランダムなアフィン変換を生成・適用する
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    /// 設定範囲から変換パラメータを一様にサンプリング
    pub fn random_transform(&self, rng: &mut impl Rng, size: usize) -> AffineTransform {
        let cfg = &self.config;
        let theta = symmetric(rng, cfg.rotation_range).to_radians();
        let tx = symmetric(rng, cfg.width_shift_range) * size as f32;
        let ty = symmetric(rng, cfg.height_shift_range) * size as f32;
        let shear = symmetric(rng, cfg.shear_range);
        let (zx, zy) = if cfg.zoom_range > 0.0 {
            (
                rng.gen_range(1.0 - cfg.zoom_range..=1.0 + cfg.zoom_range),
                rng.gen_range(1.0 - cfg.zoom_range..=1.0 + cfg.zoom_range),
            )
        } else {
            (1.0, 1.0)
        };
        let flip_horizontal = cfg.horizontal_flip && rng.gen_bool(0.5);

        let rotation = [[theta.cos(), -theta.sin()], [theta.sin(), theta.cos()]];
        let shear_matrix = [[1.0, -shear.sin()], [0.0, shear.cos()]];
        let zoom = [[zx, 0.0], [0.0, zy]];

        AffineTransform {
            matrix: mat_mul(mat_mul(rotation, shear_matrix), zoom),
            offset: [tx, ty],
            flip_horizontal,
        }
    }

    /// 変換を適用（双線形補間、はみ出しは `fill_mode` で埋める）
    pub fn apply_transform(&self, pixels: &[f32], size: usize, transform: &AffineTransform) -> Vec<f32> {
        let center = (size as f32 - 1.0) / 2.0;
        let m = transform.matrix;
        let mut out = Vec::with_capacity(size * size);

        for y in 0..size {
            for x in 0..size {
                // 反転はアフィン変換の後に行う
                let xf = if transform.flip_horizontal { size - 1 - x } else { x };
                let dx = xf as f32 - center;
                let dy = y as f32 - center;
                let src_x = m[0][0] * dx + m[0][1] * dy + transform.offset[0] + center;
                let src_y = m[1][0] * dx + m[1][1] * dy + transform.offset[1] + center;
                out.push(sample_bilinear(pixels, size, src_x, src_y, self.config.fill_mode));
            }
        }

        out
    }

    /// ランダムな変換を1枚に適用
    pub fn apply(&self, pixels: &[f32], size: usize, rng: &mut impl Rng) -> Vec<f32> {
        let transform = self.random_transform(rng, size);
        self.apply_transform(pixels, size, &transform)
    }
}

fn sample_bilinear(pixels: &[f32], size: usize, x: f32, y: f32, fill_mode: FillMode) -> f32 {
    let max = size as f32 - 1.0;
    let (x, y) = match fill_mode {
        FillMode::Nearest => (x.clamp(0.0, max), y.clamp(0.0, max)),
        FillMode::Constant => (x, y),
    };

    let fetch = |ix: i64, iy: i64| -> f32 {
        let limit = size as i64 - 1;
        match fill_mode {
            FillMode::Nearest => {
                let cx = ix.clamp(0, limit) as usize;
                let cy = iy.clamp(0, limit) as usize;
                pixels[cy * size + cx]
            }
            FillMode::Constant => {
                if ix < 0 || iy < 0 || ix > limit || iy > limit {
                    0.0
                } else {
                    pixels[iy as usize * size + ix as usize]
                }
            }
        }
    };

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (ix, iy) = (x0 as i64, y0 as i64);

    let top = fetch(ix, iy) * (1.0 - fx) + fetch(ix + 1, iy) * fx;
    let bottom = fetch(ix, iy + 1) * (1.0 - fx) + fetch(ix + 1, iy + 1) * fx;
    (top * (1.0 - fy) + bottom * fy).clamp(0.0, 1.0)
}

/// 拡張済み学習バッチの無限シーケンス
///
/// データを1周するごとに順序をシャッフルし直し、取り出すたびに新しく拡張する。
/// 1エポックは `steps_per_epoch()` バッチ分。
pub struct AugmentedFlow {
    dataset: SignatureDataset,
    augmenter: Augmenter,
    image_size: usize,
    batch_size: usize,
    seed: u64,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
}

impl AugmentedFlow {
    pub fn new(
        dataset: SignatureDataset,
        augmenter: Augmenter,
        image_size: usize,
        batch_size: usize,
        seed: u64,
    ) -> Self {
        Self {
            dataset,
            augmenter,
            image_size,
            batch_size: batch_size.max(1),
            seed,
            rng: StdRng::seed_from_u64(seed),
            order: Vec::new(),
            cursor: 0,
        }
    }

    pub fn num_samples(&self) -> usize {
        self.dataset.samples().len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn steps_per_epoch(&self) -> usize {
        self.num_samples().div_ceil(self.batch_size)
    }

    /// 最初から（同じシードで）やり直す
    pub fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.order.clear();
        self.cursor = 0;
    }

    fn start_pass(&mut self) {
        self.order = (0..self.num_samples()).collect();
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
    }
}

impl Iterator for AugmentedFlow {
    type Item = Vec<SignatureSample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_samples() == 0 {
            return None;
        }
        if self.cursor >= self.order.len() {
            self.start_pass();
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let samples = self.dataset.samples();
        let mut batch = Vec::with_capacity(end - self.cursor);
        for &idx in &self.order[self.cursor..end] {
            let sample = &samples[idx];
            batch.push(SignatureSample {
                pixels: self.augmenter.apply(&sample.pixels, self.image_size, &mut self.rng),
                label: sample.label,
                path: sample.path.clone(),
            });
        }
        self.cursor = end;

        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SIZE: usize = 16;

    fn gradient() -> Vec<f32> {
        (0..SIZE * SIZE).map(|i| (i % SIZE) as f32 / (SIZE - 1) as f32).collect()
    }

    fn dataset(n: usize) -> SignatureDataset {
        SignatureDataset::new(
            (0..n)
                .map(|i| SignatureSample {
                    pixels: gradient(),
                    label: i % 2,
                    path: PathBuf::from(format!("{i}.png")),
                })
                .collect(),
        )
    }

    #[test]
    fn test_identity_leaves_image_unchanged() {
        let augmenter = Augmenter::new(AugmentationConfig::identity());
        let mut rng = StdRng::seed_from_u64(1);
        let input = gradient();
        let out = augmenter.apply(&input, SIZE, &mut rng);
        for (a, b) in input.iter().zip(&out) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_horizontal_flip_mirrors_rows() {
        let augmenter = Augmenter::new(AugmentationConfig::identity());
        let transform = AffineTransform {
            flip_horizontal: true,
            ..AffineTransform::identity()
        };
        let input = gradient();
        let out = augmenter.apply_transform(&input, SIZE, &transform);
        for y in 0..SIZE {
            for x in 0..SIZE {
                let expected = input[y * SIZE + (SIZE - 1 - x)];
                assert!((out[y * SIZE + x] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_shift_fills_with_nearest_edge() {
        let augmenter = Augmenter::new(AugmentationConfig::identity());
        let transform = AffineTransform {
            offset: [4.0, 0.0],
            ..AffineTransform::identity()
        };
        let out = augmenter.apply_transform(&gradient(), SIZE, &transform);
        // 右側は最右列の値（1.0）で埋まる
        assert!((out[SIZE - 1] - 1.0).abs() < 1e-6);
        assert!((out[SIZE - 2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_random_augmentation_keeps_range_and_shape() {
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let out = augmenter.apply(&gradient(), SIZE, &mut rng);
            assert_eq!(out.len(), SIZE * SIZE);
            assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_flow_batches_per_epoch() {
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let mut flow = AugmentedFlow::new(dataset(70), augmenter, SIZE, 32, 42);
        assert_eq!(flow.steps_per_epoch(), 3);

        let sizes: Vec<usize> = flow.by_ref().take(3).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![32, 32, 6]);

        // 無限に続き、次の周回が始まる
        let next = flow.next().unwrap();
        assert_eq!(next.len(), 32);
    }

    #[test]
    fn test_flow_is_not_idempotent_but_restartable() {
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let mut flow = AugmentedFlow::new(dataset(4), augmenter, SIZE, 4, 3);

        let first = flow.next().unwrap();
        let second = flow.next().unwrap();
        let first_pixels: Vec<Vec<f32>> = first.iter().map(|s| s.pixels.clone()).collect();
        let second_pixels: Vec<Vec<f32>> = second.iter().map(|s| s.pixels.clone()).collect();
        assert_ne!(first_pixels, second_pixels);

        flow.reset();
        let again = flow.next().unwrap();
        let again_pixels: Vec<Vec<f32>> = again.iter().map(|s| s.pixels.clone()).collect();
        assert_eq!(first_pixels, again_pixels);
    }

    #[test]
    fn test_empty_flow_yields_nothing() {
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let mut flow = AugmentedFlow::new(SignatureDataset::default(), augmenter, SIZE, 32, 42);
        assert_eq!(flow.steps_per_epoch(), 0);
        assert!(flow.next().is_none());
    }
}
