//! UCI チェスエンジンをプールして複数の呼び出し元に提供する解析サービス。
//!
//! - [`engine`]: エンジン 1 プロセスのドライバ
//! - [`pool`]: 固定数のエンジンの FIFO 貸し出しとスロットごとの排他実行
//! - [`session`]: 対局 ID とスロットの対応、棋譜の管理
//! - [`review`] / [`classify`]: 終局後の棋譜検討と着手の分類

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod review;
pub mod rules;
pub mod session;

use std::sync::Arc;

pub use classify::{Classification, classify};
pub use config::{EngineConfig, EngineOptions, PoolConfig, ReviewConfig, ServiceConfig};
pub use engine::{
    AnalysisRequest, AnalysisResult, CommandLauncher, Engine, EngineDriver, ProgressCallback,
};
pub use error::{AnalysisError, Result};
pub use pool::{EnginePool, SlotId, SlotLease};
pub use review::{PlyReport, ReviewRequest, ReviewSummary, review_game, review_game_with};
pub use rules::{CozyRules, Rules, Side};
pub use session::{GameRegistry, GameSession};

pub use rchess_uci::{InfoLine, Score, SearchLimits, StartPosition};

/// 設定どおりのエンジン実行ファイルを子プロセスとして起動するプールを作る。
pub async fn spawn_pool(config: &ServiceConfig) -> Result<EnginePool<EngineDriver>> {
    let launcher = Arc::new(CommandLauncher::new(&config.engine.path, config.engine.args.clone()));
    EnginePool::init(&config.pool, |id| {
        EngineDriver::new(format!("engine#{id}"), config.engine.clone(), launcher.clone())
    })
    .await
}
