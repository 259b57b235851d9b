//! 評価値の変化による着手の分類。

use rchess_uci::Score;
use serde::{Deserialize, Serialize};

/// この値以上の評価値低下で大悪手
pub const BLUNDER_THRESHOLD: i32 = 150;
pub const MISTAKE_THRESHOLD: i32 = 80;
pub const INACCURACY_THRESHOLD: i32 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Good,
    Inaccuracy,
    Mistake,
    Blunder,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Inaccuracy => "inaccuracy",
            Self::Mistake => "mistake",
            Self::Blunder => "blunder",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 着手前後の評価値（どちらも着手した側から見た値）から着手を分類する。
///
/// 勝ちの詰みを手放した場合と、詰みまでの手数を延ばした場合は低下量によらず大悪手。
pub fn classify(before: Option<Score>, after: Option<Score>) -> Classification {
    let (Some(before), Some(after)) = (before, after) else {
        return Classification::Good;
    };

    if let Score::Mate(before_mate) = before {
        let kept = match after {
            Score::Mate(after_mate) => after_mate > 0 && after_mate <= before_mate,
            Score::Cp(_) => false,
        };
        if before_mate > 0 && !kept {
            return Classification::Blunder;
        }
    }

    let drop = centipawn_loss(before, after);
    if drop >= BLUNDER_THRESHOLD {
        Classification::Blunder
    } else if drop >= MISTAKE_THRESHOLD {
        Classification::Mistake
    } else if drop >= INACCURACY_THRESHOLD {
        Classification::Inaccuracy
    } else {
        Classification::Good
    }
}

/// 正規化した評価値の低下量。改善した場合は負になる。
pub fn centipawn_loss(before: Score, after: Score) -> i32 {
    before.normalized() - after.normalized()
}
