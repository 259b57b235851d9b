//! 評価値（centipawn / mate）と正規化スケール

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 詰みスコアの基準値。`mate N` は `±(MATE_BASE - MATE_STEP * |N|)` に写す。
pub const MATE_BASE: i32 = 100_000;
/// 詰み手数 1 手あたりの減衰量
pub const MATE_STEP: i32 = 1_000;

/// エンジンが報告する評価値。符号は常に手番側から見た値。
///
/// - `Cp(v)`: centipawn 単位の評価
/// - `Mate(n)`: `n > 0` なら手番側が n 手で詰ませる、`n < 0` なら n 手で詰まされる。
///   `Mate(0)` は手番側が既に詰んでいる局面
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

impl Score {
    /// centipawn と詰みを単一の整数スケールに揃える。
    ///
    /// 短い詰みほど絶対値が大きく、どの詰みスコアも現実的な centipawn 値より外側に来るため
    /// 両種類を混ぜても全順序が保たれる。
    pub fn normalized(self) -> i32 {
        match self {
            Score::Cp(v) => v,
            Score::Mate(0) => -MATE_BASE,
            Score::Mate(n) => n.signum() * (MATE_BASE - MATE_STEP * n.abs()),
        }
    }

    /// 視点を反転する（相手番から見た評価を手番側の評価に変換する）。
    pub fn invert(self) -> Self {
        match self {
            Score::Cp(v) => Score::Cp(-v),
            Score::Mate(n) => Score::Mate(-n),
        }
    }

    pub fn is_mate(self) -> bool {
        matches!(self, Score::Mate(_))
    }

    /// 手番側が詰ませる側なら `Some(手数)`
    pub fn mate_for_mover(self) -> Option<i32> {
        match self {
            Score::Mate(n) if n > 0 => Some(n),
            _ => None,
        }
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized().cmp(&other.normalized())
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Score::Cp(v) => write!(f, "{:+.2}", f64::from(v) / 100.0),
            Score::Mate(n) if n >= 0 => write!(f, "+M{n}"),
            Score::Mate(n) => write!(f, "-M{}", n.abs()),
        }
    }
}
