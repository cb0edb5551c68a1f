//! ラベルのone-hot化と学習/検証/テストへの分割

use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::loader::{SignatureDataset, SignatureSample};
use crate::types::NUM_CLASSES;

/// クラスIDをone-hotベクトルに変換
pub fn one_hot(label: usize) -> [f32; NUM_CLASSES] {
    let mut encoded = [0.0; NUM_CLASSES];
    if let Some(slot) = encoded.get_mut(label) {
        *slot = 1.0;
    }
    encoded
}

/// シード付きでシャッフルして (train, test) に分割
///
/// テスト側の件数は `ceil(n * test_ratio)`、残りが学習側。
pub fn train_test_split<T>(items: Vec<T>, test_ratio: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let total_len = items.len();
    let test_len = ((total_len as f64 * test_ratio).max(0.0).ceil() as usize).min(total_len);

    // インデックスのみをシャッフル
    let mut indices: Vec<usize> = (0..total_len).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut test = Vec::with_capacity(test_len);
    let mut train = Vec::with_capacity(total_len - test_len);
    for (position, idx) in indices.into_iter().enumerate() {
        if let Some(item) = slots[idx].take() {
            if position < test_len {
                test.push(item);
            } else {
                train.push(item);
            }
        }
    }

    (train, test)
}

/// 学習/検証/テストの3分割
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub train: SignatureDataset,
    pub validation: SignatureDataset,
    pub test: SignatureDataset,
}

/// 2段階の分割（まずテストを切り出し、残りから検証を切り出す）
///
/// 比率0.2/0.2で全体のおよそ 64/16/20 になる。同じ入力順とシードなら常に同じ分割。
pub fn split_dataset(
    samples: Vec<SignatureSample>,
    test_ratio: f64,
    validation_ratio: f64,
    seed: u64,
) -> DatasetSplits {
    let (train_full, test) = train_test_split(samples, test_ratio, seed);
    let (train, validation) = train_test_split(train_full, validation_ratio, seed);

    DatasetSplits {
        train: SignatureDataset::new(train),
        validation: SignatureDataset::new(validation),
        test: SignatureDataset::new(test),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_dataset::Dataset;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn samples(n: usize) -> Vec<SignatureSample> {
        (0..n)
            .map(|i| SignatureSample {
                pixels: vec![i as f32 / n as f32],
                label: i % 2,
                path: PathBuf::from(format!("img_{i}.png")),
            })
            .collect()
    }

    fn paths(dataset: &SignatureDataset) -> Vec<PathBuf> {
        dataset.samples().iter().map(|s| s.path.clone()).collect()
    }

    #[test]
    fn test_one_hot() {
        assert_eq!(one_hot(0), [1.0, 0.0]);
        assert_eq!(one_hot(1), [0.0, 1.0]);
    }

    #[test]
    fn test_split_sizes() {
        let (train, test) = train_test_split((0..20).collect::<Vec<_>>(), 0.2, 42);
        assert_eq!(train.len(), 16);
        assert_eq!(test.len(), 4);

        let splits = split_dataset(samples(100), 0.2, 0.2, 42);
        assert_eq!(splits.test.len(), 20);
        assert_eq!(splits.validation.len(), 16);
        assert_eq!(splits.train.len(), 64);
    }

    #[test]
    fn test_split_sizes_on_large_datasets() {
        for n in [37usize, 340, 500, 1001, 2640] {
            let (train, test) = train_test_split((0..n).collect::<Vec<_>>(), 0.2, 42);
            // ceil(n / 5) を整数演算で
            assert_eq!(test.len(), n.div_ceil(5), "n={n}");
            assert_eq!(train.len() + test.len(), n);
        }

        let (_, test) = train_test_split((0..10).collect::<Vec<_>>(), 0.3, 42);
        assert_eq!(test.len(), 3);

        let splits = split_dataset(samples(2640), 0.2, 0.2, 42);
        assert_eq!(splits.test.len(), 528);
        assert_eq!(splits.validation.len(), 423);
        assert_eq!(splits.train.len(), 1689);
    }

    #[test]
    fn test_split_is_deterministic() {
        let a = split_dataset(samples(50), 0.2, 0.2, 42);
        let b = split_dataset(samples(50), 0.2, 0.2, 42);
        assert_eq!(paths(&a.train), paths(&b.train));
        assert_eq!(paths(&a.validation), paths(&b.validation));
        assert_eq!(paths(&a.test), paths(&b.test));

        let c = split_dataset(samples(50), 0.2, 0.2, 7);
        assert_ne!(paths(&a.test), paths(&c.test));
    }

    #[test]
    fn test_split_is_disjoint_partition() {
        let splits = split_dataset(samples(37), 0.2, 0.2, 42);
        let mut seen = HashSet::new();
        for path in paths(&splits.train)
            .into_iter()
            .chain(paths(&splits.validation))
            .chain(paths(&splits.test))
        {
            assert!(seen.insert(path), "sample appears in more than one split");
        }
        assert_eq!(seen.len(), 37);
    }

    #[test]
    fn test_split_empty_input() {
        let splits = split_dataset(Vec::new(), 0.2, 0.2, 42);
        assert!(splits.train.is_empty());
        assert!(splits.test.is_empty());
    }
}
