//! UCI エンジン 1 プロセス分のドライバと、プールから見たエンジンの振る舞い。

mod driver;
mod process;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use rchess_uci::{InfoLine, SearchLimits, StartPosition};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::EngineOptions;
use crate::error::Result;

pub use driver::{DriverState, EngineDriver};
pub use process::{CommandLauncher, EngineIo, EngineProcess, EngineReader, EngineWriter, Launcher};

/// 探索中の info 行を受け取るコールバック
pub type ProgressCallback = Arc<dyn Fn(&InfoLine) + Send + Sync>;

/// プールのスロットが保持するエンジン。
///
/// 実装はスロットの排他制御の内側でのみ呼ばれるため、`&mut self` を前提にしてよい。
/// テストでは計測用のフェイク実装に差し替える。
pub trait Engine: Send + 'static {
    /// プロセスを起動してハンドシェイクと初期設定を行う。起動済みなら何もしない。
    fn init(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn configure(&mut self, options: EngineOptions) -> impl Future<Output = Result<()>> + Send;

    /// 直前の対局に紐づく内部状態を破棄させる。
    fn new_game(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn analyze(
        &mut self,
        request: AnalysisRequest,
    ) -> impl Future<Output = Result<AnalysisResult>> + Send;

    fn stop(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn dispose(&mut self) -> impl Future<Output = ()> + Send;

    fn ping(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// 1 回の解析要求
#[derive(Clone, Default)]
pub struct AnalysisRequest {
    pub position: StartPosition,
    /// `position` から再生する手順（UCI 座標表記）
    pub moves: Vec<String>,
    pub limits: SearchLimits,
    /// `None` ならドライバに設定済みの MultiPV をそのまま使う
    pub multipv: Option<u32>,
    pub cancel: Option<CancellationToken>,
    pub on_info: Option<ProgressCallback>,
}

impl AnalysisRequest {
    pub fn new(position: StartPosition, moves: Vec<String>) -> Self {
        Self { position, moves, ..Self::default() }
    }

    pub fn with_limits(mut self, limits: SearchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_multipv(mut self, multipv: u32) -> Self {
        self.multipv = Some(multipv);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, on_info: ProgressCallback) -> Self {
        self.on_info = Some(on_info);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

impl fmt::Debug for AnalysisRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRequest")
            .field("position", &self.position)
            .field("moves", &self.moves)
            .field("limits", &self.limits)
            .field("multipv", &self.multipv)
            .field("cancellable", &self.cancel.is_some())
            .field("progress", &self.on_info.is_some())
            .finish()
    }
}

/// 解析結果。`lines` は MultiPV ランクの昇順。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub best_move: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ponder: Option<String>,
    pub lines: Vec<InfoLine>,
}

impl AnalysisResult {
    pub fn top_line(&self) -> Option<&InfoLine> {
        self.lines.first()
    }

    /// 最初の手が `mv` の読み筋
    pub fn line_starting_with(&self, mv: &str) -> Option<&InfoLine> {
        self.lines.iter().find(|line| line.first_move() == Some(mv))
    }
}
