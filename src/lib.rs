//! 手書き署名の真贋判定（genuine / forged）
//!
//! グレースケール画像を読み込み、小さなCNNを学習・評価・保存し、
//! 新しい画像を判定する。

pub mod types;
pub mod logging;
pub mod data;
pub mod ml;
pub mod model;
pub mod report;
pub mod pipeline;

pub use types::{SignatureClass, NUM_CLASSES};
