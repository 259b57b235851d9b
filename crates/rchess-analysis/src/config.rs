//! サービス設定（TOML）

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_QUIT_TIMEOUT_MS: u64 = 1_000;
/// プールの上限スロット数
pub const MAX_POOL_SIZE: usize = 8;

/// エンジンに送る調整可能なオプション。`None` のフィールドは送らない。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_mb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipv: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_file: Option<PathBuf>,
}

impl EngineOptions {
    pub fn multipv(multipv: u32) -> Self {
        Self { multipv: Some(multipv), ..Self::default() }
    }

    /// `(UCI オプション名, 値)` の組に展開する。
    pub fn to_uci_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = self.threads {
            pairs.push(("Threads", v.to_string()));
        }
        if let Some(v) = self.hash_mb {
            pairs.push(("Hash", v.to_string()));
        }
        if let Some(v) = self.multipv {
            pairs.push(("MultiPV", v.to_string()));
        }
        if let Some(path) = &self.eval_file {
            pairs.push(("EvalFile", path.display().to_string()));
        }
        pairs
    }
}

/// エンジンプロセス起動時の設定。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub threads: u32,
    pub hash_mb: u32,
    /// 既定の MultiPV。リクエストが別の値を指定した場合は探索後にこの値へ戻す
    pub multipv: u32,
    pub eval_file: Option<PathBuf>,
    pub handshake_timeout_ms: u64,
    /// `bestmove` 待ちの上限。呼び出し元の持ち時間とは独立した、固まったエンジンの検出用
    pub search_timeout_ms: u64,
    pub quit_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stockfish"),
            args: Vec::new(),
            threads: 1,
            hash_mb: 16,
            multipv: 1,
            eval_file: None,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            search_timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
            quit_timeout_ms: DEFAULT_QUIT_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// `init` 直後に適用するオプション
    pub fn initial_options(&self) -> EngineOptions {
        EngineOptions {
            threads: Some(self.threads),
            hash_mb: Some(self.hash_mb),
            multipv: Some(self.multipv),
            eval_file: self.eval_file.clone(),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn quit_timeout(&self) -> Duration {
        Duration::from_millis(self.quit_timeout_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 未指定なら CPU コア数の半分（最低 1）。いずれにせよ [`MAX_POOL_SIZE`] で頭打ち
    pub size: Option<usize>,
}

impl PoolConfig {
    pub fn resolved_size(&self, available_cores: usize) -> usize {
        let size = self.size.unwrap_or((available_cores / 2).max(1));
        size.min(MAX_POOL_SIZE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub movetime_ms: u64,
    pub multipv: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { movetime_ms: 300, multipv: 3 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub engine: EngineConfig,
    pub pool: PoolConfig,
    pub review: ReviewConfig,
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file: {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
