//! エンジンへ送るコマンドの組み立て

use serde::{Deserialize, Serialize};

pub const UCI: &str = "uci";
pub const IS_READY: &str = "isready";
pub const UCI_NEW_GAME: &str = "ucinewgame";
pub const STOP: &str = "stop";
pub const QUIT: &str = "quit";

/// 探索制限が何も指定されなかったときの movetime (ms)
pub const DEFAULT_MOVETIME_MS: u64 = 300;

/// 探索開始局面
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// 平手初期局面
    #[default]
    Standard,
    /// FEN 文字列（先頭の `fen` キーワードは含まない）
    Fen(String),
}

impl StartPosition {
    pub fn from_fen(fen: Option<&str>) -> Self {
        match fen.map(str::trim) {
            Some(f) if !f.is_empty() && f != "startpos" => StartPosition::Fen(f.to_string()),
            _ => StartPosition::Standard,
        }
    }
}

/// `go` に渡す探索制限。複数指定した場合はすべて送る（エンジンは最初に到達した制限で止まる）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movetime_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
}

impl SearchLimits {
    pub fn movetime(ms: u64) -> Self {
        Self { movetime_ms: Some(ms), ..Self::default() }
    }

    pub fn depth(depth: u32) -> Self {
        Self { depth: Some(depth), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.movetime_ms.is_none() && self.depth.is_none() && self.nodes.is_none()
    }
}

/// `position startpos|fen <FEN> [moves ...]` を組み立てる。
pub fn position_command<S: AsRef<str>>(position: &StartPosition, moves: &[S]) -> String {
    let mut cmd = match position {
        StartPosition::Standard => String::from("position startpos"),
        StartPosition::Fen(fen) => format!("position fen {fen}"),
    };
    if !moves.is_empty() {
        cmd.push_str(" moves");
        for mv in moves {
            cmd.push(' ');
            cmd.push_str(mv.as_ref());
        }
    }
    cmd
}

/// `go` コマンド。制限が空なら `movetime 300`。
pub fn go_command(limits: &SearchLimits) -> String {
    if limits.is_empty() {
        return format!("go movetime {DEFAULT_MOVETIME_MS}");
    }
    let mut cmd = String::from("go");
    if let Some(ms) = limits.movetime_ms {
        cmd.push_str(&format!(" movetime {ms}"));
    }
    if let Some(depth) = limits.depth {
        cmd.push_str(&format!(" depth {depth}"));
    }
    if let Some(nodes) = limits.nodes {
        cmd.push_str(&format!(" nodes {nodes}"));
    }
    cmd
}

pub fn set_option_command(name: &str, value: &str) -> String {
    format!("setoption name {name} value {value}")
}

/// `option name <NAME> type ...` 行からオプション名を取り出す（名前は空白を含み得る）。
pub fn parse_option_name(line: &str) -> Option<String> {
    let rest = line.strip_prefix("option ")?;
    let mut tokens = rest.split_whitespace();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let parts: Vec<&str> = tokens.by_ref().take_while(|t| *t != "type").collect();
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}

/// `id name <NAME>` 行からエンジン名を取り出す。
pub fn parse_id_name(line: &str) -> Option<&str> {
    line.strip_prefix("id name ").map(str::trim)
}
