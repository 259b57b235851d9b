//! 解析サービスのエラー型

/// 解析サービスの各操作が返すエラー。
///
/// 呼び出し元の入力に起因するもの（4xx 相当）と、エンジン基盤の不調を示すもの
/// （[`AnalysisError::is_unavailable`]、5xx 相当）を区別できる。
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("game already exists: {0}")]
    GameAlreadyExists(String),

    #[error("game not found: {0}")]
    GameNotFound(String),

    #[error("invalid position '{fen}': {reason}")]
    InvalidPosition { fen: String, reason: String },

    #[error("illegal move '{mv}'")]
    IllegalMove { mv: String },

    #[error("worker not found: {0}")]
    WorkerNotFound(usize),

    #[error("no engine workers available")]
    NoWorkersAvailable,

    /// `uciok` / `readyok` が期限内に返らなかった（エンジンが固まっている）
    #[error("engine did not answer '{command}' within {timeout_ms} ms")]
    HandshakeTimeout { command: &'static str, timeout_ms: u64 },

    /// `bestmove` が期限内に返らなかった
    #[error("engine produced no bestmove within {timeout_ms} ms")]
    SearchTimeout { timeout_ms: u64 },

    #[error("analysis aborted")]
    AnalysisAborted,

    #[error("engine process is not running: {0}")]
    ProcessNotRunning(String),
}

impl AnalysisError {
    /// エンジン基盤側の障害か（呼び出し元の入力ではなく、サービス不可として扱うべきもの）
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AnalysisError::NoWorkersAvailable
                | AnalysisError::HandshakeTimeout { .. }
                | AnalysisError::SearchTimeout { .. }
                | AnalysisError::ProcessNotRunning(_)
        )
    }

    /// トランスポート層向けの HTTP 相当ステータス
    pub fn status_code(&self) -> u16 {
        match self {
            AnalysisError::GameAlreadyExists(_) => 409,
            AnalysisError::GameNotFound(_) | AnalysisError::WorkerNotFound(_) => 404,
            AnalysisError::InvalidPosition { .. } => 400,
            AnalysisError::IllegalMove { .. } => 422,
            // client closed request
            AnalysisError::AnalysisAborted => 499,
            _ => 503,
        }
    }

    pub(crate) fn io(context: &str, err: std::io::Error) -> Self {
        AnalysisError::ProcessNotRunning(format!("{context}: {err}"))
    }
}

/// 解析サービスの Result 型
pub type Result<T> = std::result::Result<T, AnalysisError>;
