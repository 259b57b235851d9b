//! 終局後の棋譜検討。
//!
//! 1 つのスロットを借りたまま全手を順に解析し、着手前後の評価値から各手を分類する。

use rchess_uci::{InfoLine, Score, SearchLimits, StartPosition};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::classify::{Classification, classify};
use crate::engine::{AnalysisRequest, Engine};
use crate::error::Result;
use crate::pool::{EnginePool, SlotId};
use crate::rules::{Rules, Side};

/// 平均損失の計算で 1 手あたりに数える評価値の上限（詰みの評価値で平均が振り切れないように）
pub const ACPL_SCORE_CAP: i32 = 1_000;

#[derive(Clone, Debug, Default)]
pub struct ReviewRequest {
    pub initial_fen: Option<String>,
    pub moves: Vec<String>,
    /// 1 手あたりの探索制限
    pub limits: SearchLimits,
    pub multipv: u32,
    pub cancel: Option<CancellationToken>,
}

impl ReviewRequest {
    pub fn new(moves: Vec<String>, limits: SearchLimits, multipv: u32) -> Self {
        Self { moves, limits, multipv, ..Self::default() }
    }

    pub fn with_fen(mut self, fen: impl Into<String>) -> Self {
        self.initial_fen = Some(fen.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn analysis(&self, moves: &[String], multipv: u32) -> AnalysisRequest {
        let mut request = AnalysisRequest::new(
            StartPosition::from_fen(self.initial_fen.as_deref()),
            moves.to_vec(),
        )
        .with_limits(self.limits)
        .with_multipv(multipv);
        request.cancel = self.cancel.clone();
        request
    }
}

/// 指された手以外の候補手
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeLine {
    pub pv: String,
    pub score: Score,
    pub depth: u32,
}

impl From<&InfoLine> for AlternativeLine {
    fn from(line: &InfoLine) -> Self {
        Self { pv: line.pv_string(), score: line.score, depth: line.depth }
    }
}

/// 1 手分の検討結果。評価値はいずれも指した側から見た値
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlyReport {
    pub ply: usize,
    pub side: Side,
    pub played: String,
    pub best_move: Option<String>,
    pub score_before: Option<Score>,
    pub score_after: Option<Score>,
    pub classification: Classification,
    pub alternatives: Vec<AlternativeLine>,
}

/// 棋譜全体を検討する。
pub async fn review_game<E: Engine, R: Rules>(
    pool: &EnginePool<E>,
    rules: &R,
    request: &ReviewRequest,
) -> Result<Vec<PlyReport>> {
    review_game_with(pool, rules, request, |_| {}).await
}

/// [`review_game`] と同じだが、1 手検討するたびに `on_ply` を呼ぶ。
///
/// スロットは開始時に 1 回確保し、成否にかかわらず終了時に返却する。手がなければ確保しない。
pub async fn review_game_with<E: Engine, R: Rules>(
    pool: &EnginePool<E>,
    rules: &R,
    request: &ReviewRequest,
    mut on_ply: impl FnMut(&PlyReport),
) -> Result<Vec<PlyReport>> {
    let mut position = rules.replay::<&str>(request.initial_fen.as_deref(), &[])?;
    if request.moves.is_empty() {
        return Ok(Vec::new());
    }

    let lease = pool.lease().await?;
    let worker = lease.id();
    pool.new_game(worker).await?;
    log::info!("reviewing {} plies on worker {worker}", request.moves.len());

    let mut reports = Vec::with_capacity(request.moves.len());
    for (ply, played) in request.moves.iter().enumerate() {
        let side = rules.side_to_move(&position);
        let before = pool
            .analyze_with_worker(worker, request.analysis(&request.moves[..ply], request.multipv.max(1)))
            .await?;
        let alternatives = before
            .lines
            .iter()
            .filter(|line| line.first_move() != Some(played.as_str()))
            .map(AlternativeLine::from)
            .collect();

        position = rules.apply(&position, played)?;

        let score_after = match before.line_starting_with(played) {
            Some(line) => Some(line.score),
            None => score_after_move(pool, worker, request, ply).await?,
        };
        let score_before = before.top_line().map(|line| line.score);

        let report = PlyReport {
            ply,
            side,
            played: played.clone(),
            best_move: before.best_move,
            score_before,
            score_after,
            classification: classify(score_before, score_after),
            alternatives,
        };
        log::debug!("ply {ply} {played}: {}", report.classification);
        on_ply(&report);
        reports.push(report);
    }
    Ok(reports)
}

/// 着手後の局面を単一 PV で探索し、指した側から見た評価値に直す。
async fn score_after_move<E: Engine>(
    pool: &EnginePool<E>,
    worker: SlotId,
    request: &ReviewRequest,
    ply: usize,
) -> Result<Option<Score>> {
    let after = pool
        .analyze_with_worker(worker, request.analysis(&request.moves[..=ply], 1))
        .await?;
    Ok(after.top_line().map(|line| mover_score(line.score)))
}

/// 相手から見た評価値を指した側から見た値に変換する。
///
/// 相手が `mate 0`（既に詰んでいる）を返したら、指した手が 1 手詰めだったとみなす。
fn mover_score(opponent: Score) -> Score {
    match opponent {
        Score::Mate(0) => Score::Mate(1),
        other => other.invert(),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SideSummary {
    pub moves: usize,
    pub good: usize,
    pub inaccuracies: usize,
    pub mistakes: usize,
    pub blunders: usize,
    /// 評価値が揃っている手の平均損失（センチポーン）
    pub average_centipawn_loss: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub white: SideSummary,
    pub black: SideSummary,
}

impl ReviewSummary {
    pub fn from_reports(reports: &[PlyReport]) -> Self {
        Self {
            white: summarize(reports, Side::White),
            black: summarize(reports, Side::Black),
        }
    }

    pub fn side(&self, side: Side) -> &SideSummary {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }
}

fn summarize(reports: &[PlyReport], side: Side) -> SideSummary {
    let mut summary = SideSummary::default();
    let mut total_loss = 0i64;
    let mut scored = 0usize;
    for report in reports.iter().filter(|r| r.side == side) {
        summary.moves += 1;
        match report.classification {
            Classification::Good => summary.good += 1,
            Classification::Inaccuracy => summary.inaccuracies += 1,
            Classification::Mistake => summary.mistakes += 1,
            Classification::Blunder => summary.blunders += 1,
        }
        if let (Some(before), Some(after)) = (report.score_before, report.score_after) {
            let capped = |s: Score| s.normalized().clamp(-ACPL_SCORE_CAP, ACPL_SCORE_CAP);
            total_loss += i64::from((capped(before) - capped(after)).max(0));
            scored += 1;
        }
    }
    if scored > 0 {
        summary.average_centipawn_loss = Some(total_loss as f64 / scored as f64);
    }
    summary
}
