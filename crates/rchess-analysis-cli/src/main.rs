//! UCI エンジンプールを使った局面解析・棋譜検討 CLI
//!
//! # 使用例
//!
//! ```bash
//! # 局面解析（JSON で AnalysisResult を出力）
//! rchess-analyze --engine /usr/games/stockfish analyze --moves e2e4,e7e5 --depth 18 --multipv 3
//!
//! # 棋譜検討（1 手ごとに JSON Lines、最後にサマリ）
//! rchess-analyze --config rchess.toml review --moves-file game.txt --movetime 500
//!
//! # エンジンの疎通確認
//! rchess-analyze health
//! ```
//!
//! 終了コード: 0 成功 / 1 入力エラーなど / 2 エンジン基盤の障害（起動失敗・タイムアウト）

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rchess_analysis::{
    AnalysisError, AnalysisRequest, CozyRules, EngineDriver, EnginePool, InfoLine, ReviewRequest,
    ReviewSummary, Rules, SearchLimits, ServiceConfig, StartPosition, review_game_with, spawn_pool,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "rchess-analyze",
    version,
    about = "UCI エンジンプールによる局面解析・棋譜検討"
)]
struct Cli {
    /// 設定ファイル (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// エンジン実行ファイル（設定ファイルより優先）
    #[arg(long, global = true)]
    engine: Option<PathBuf>,

    /// プールのエンジン数（設定ファイルより優先、上限 8）
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args, Debug, Default)]
struct LimitArgs {
    /// 1 局面あたりの思考時間 (ms)
    #[arg(long)]
    movetime: Option<u64>,
    /// 探索深さ
    #[arg(long)]
    depth: Option<u32>,
    /// 探索ノード数
    #[arg(long)]
    nodes: Option<u64>,
}

impl LimitArgs {
    fn to_limits(&self) -> SearchLimits {
        SearchLimits { movetime_ms: self.movetime, depth: self.depth, nodes: self.nodes }
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// 1 局面を解析して AnalysisResult を JSON で出力
    Analyze {
        /// 開始局面の FEN（省略時は平手）
        #[arg(long)]
        fen: Option<String>,
        /// 開始局面から指す手（UCI 表記、カンマ区切り）
        #[arg(long, value_delimiter = ',')]
        moves: Vec<String>,
        #[command(flatten)]
        limits: LimitArgs,
        /// 読み筋の本数
        #[arg(long)]
        multipv: Option<u32>,
    },
    /// 棋譜全体を検討し、1 手ごとの PlyReport とサマリを JSON Lines で出力
    Review {
        /// 棋譜（UCI 表記、カンマ区切り）
        #[arg(long, value_delimiter = ',', conflicts_with = "moves_file")]
        moves: Vec<String>,
        /// 棋譜ファイル（空白または改行区切りの UCI 表記）
        #[arg(long)]
        moves_file: Option<PathBuf>,
        /// 開始局面の FEN（省略時は平手）
        #[arg(long)]
        fen: Option<String>,
        /// 1 手あたりの思考時間 (ms)（省略時は設定ファイルの review.movetime_ms）
        #[arg(long)]
        movetime: Option<u64>,
        /// 読み筋の本数（省略時は設定ファイルの review.multipv）
        #[arg(long)]
        multipv: Option<u32>,
    },
    /// エンジンの応答を確認
    Health,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<AnalysisError>() {
        Some(e) if e.is_unavailable() => 2,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let pool = spawn_pool(&config)
        .await
        .with_context(|| format!("failed to start engine {}", config.engine.path.display()))?;

    let outcome = execute(&pool, &config, cli.cmd).await;
    pool.dispose_all().await;
    outcome
}

async fn execute(pool: &EnginePool<EngineDriver>, config: &ServiceConfig, cmd: Cmd) -> Result<()> {
    match cmd {
        Cmd::Analyze { fen, moves, limits, multipv } => {
            run_analyze(pool, fen, moves, limits.to_limits(), multipv).await
        }
        Cmd::Review { moves, moves_file, fen, movetime, multipv } => {
            let moves = match moves_file {
                Some(path) => read_moves(&path)?,
                None => moves,
            };
            let request = ReviewRequest::new(
                moves,
                SearchLimits::movetime(movetime.unwrap_or(config.review.movetime_ms)),
                multipv.unwrap_or(config.review.multipv),
            );
            let request = match fen {
                Some(fen) => request.with_fen(fen),
                None => request,
            };
            run_review(pool, request).await
        }
        Cmd::Health => run_health(pool).await,
    }
}

fn load_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(engine) = &cli.engine {
        config.engine.path = engine.clone();
    }
    if let Some(size) = cli.pool_size {
        config.pool.size = Some(size);
    }
    Ok(config)
}

fn read_moves(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read moves file: {}", path.display()))?;
    Ok(text.split_whitespace().map(str::to_string).collect())
}

/// Ctrl-C で cancel されるトークン
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, stopping the search");
            trigger.cancel();
        }
    });
    cancel
}

async fn run_analyze(
    pool: &EnginePool<EngineDriver>,
    fen: Option<String>,
    moves: Vec<String>,
    limits: SearchLimits,
    multipv: Option<u32>,
) -> Result<()> {
    // エンジンに送る前に局面と手順を検証する
    CozyRules.replay(fen.as_deref(), &moves)?;

    let on_info = Arc::new(|info: &InfoLine| {
        log::debug!("depth {} multipv {} score {} pv {}", info.depth, info.multipv, info.score, info.pv_string());
    });
    let mut request = AnalysisRequest::new(StartPosition::from_fen(fen.as_deref()), moves)
        .with_limits(limits)
        .with_cancel(cancel_on_ctrl_c())
        .with_progress(on_info);
    request.multipv = multipv;

    let lease = pool.lease().await?;
    let result = pool.analyze_with_worker(lease.id(), request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_review(pool: &EnginePool<EngineDriver>, request: ReviewRequest) -> Result<()> {
    let request = request.with_cancel(cancel_on_ctrl_c());
    let reports = review_game_with(pool, &CozyRules, &request, |report| {
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(e) => log::error!("failed to serialize ply {}: {e}", report.ply),
        }
    })
    .await?;
    let summary = ReviewSummary::from_reports(&reports);
    println!("{}", serde_json::json!({ "summary": summary }));
    Ok(())
}

async fn run_health(pool: &EnginePool<EngineDriver>) -> Result<()> {
    pool.check_health().await?;
    println!("{}", serde_json::json!({ "status": "ok", "workers": pool.size() }));
    Ok(())
}
