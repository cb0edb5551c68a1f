use serde::{Deserialize, Serialize};

/// 分類クラス数（genuine / forged）
pub const NUM_CLASSES: usize = 2;

/// 署名画像のクラス
///
/// インデックスはモデル出力の列順と一致する（genuine=0, forged=1）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureClass {
    Genuine,
    Forged,
}

impl SignatureClass {
    pub const ALL: [SignatureClass; NUM_CLASSES] = [SignatureClass::Genuine, SignatureClass::Forged];

    pub fn index(self) -> usize {
        match self {
            SignatureClass::Genuine => 0,
            SignatureClass::Forged => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// 学習データのサブフォルダ名
    pub fn folder_name(self) -> &'static str {
        match self {
            SignatureClass::Genuine => "genuine",
            SignatureClass::Forged => "forged",
        }
    }

    /// 判定結果として表示する名前
    pub fn label(self) -> &'static str {
        match self {
            SignatureClass::Genuine => "Genuine",
            SignatureClass::Forged => "Forged",
        }
    }
}

impl std::fmt::Display for SignatureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
