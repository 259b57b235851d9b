//! エンジン出力（`info` / `bestmove` 行）の解析

use serde::{Deserialize, Serialize};

use crate::score::Score;

/// 1 本の読み筋（MultiPV の 1 ランク分）の評価。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoLine {
    /// MultiPV ランク（1 始まり）。単一 PV 探索のエンジンは省略するので既定は 1
    pub multipv: u32,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seldepth: Option<u32>,
    pub score: Score,
    pub pv: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nps: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashfull: Option<u32>,
}

impl InfoLine {
    pub fn first_move(&self) -> Option<&str> {
        self.pv.first().map(String::as_str)
    }

    pub fn pv_string(&self) -> String {
        self.pv.join(" ")
    }
}

/// `bestmove` 行の内容
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestMove {
    /// `bestmove (none)` / `bestmove 0000` のときは `None`（合法手がない）
    pub best: Option<String>,
    pub ponder: Option<String>,
}

/// `info` 行を解析する。
///
/// score を含まない info 行（`info string ...` や `currmove` 通知）は `None`。
/// `pv` は残りのトークンをすべて消費するので、以降のタグは読まない。
pub fn parse_info_line(line: &str) -> Option<InfoLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return None;
    }
    let tokens: Vec<&str> = tokens.collect();

    let mut multipv = 1u32;
    let mut depth = None;
    let mut seldepth = None;
    let mut score = None;
    let mut pv = Vec::new();
    let mut nodes = None;
    let mut nps = None;
    let mut time_ms = None;
    let mut hashfull = None;

    let mut i = 0;
    while i < tokens.len() {
        let next = tokens.get(i + 1).copied();
        match tokens[i] {
            "string" => return None,
            "depth" => {
                depth = next.and_then(|t| t.parse().ok());
                i += 1;
            }
            "seldepth" => {
                seldepth = next.and_then(|t| t.parse().ok());
                i += 1;
            }
            "multipv" => {
                multipv = next.and_then(|t| t.parse().ok()).unwrap_or(1);
                i += 1;
            }
            "nodes" => {
                nodes = next.and_then(|t| t.parse().ok());
                i += 1;
            }
            "nps" => {
                nps = next.and_then(|t| t.parse().ok());
                i += 1;
            }
            "time" => {
                time_ms = next.and_then(|t| t.parse().ok());
                i += 1;
            }
            "hashfull" => {
                hashfull = next.and_then(|t| t.parse().ok());
                i += 1;
            }
            "score" => {
                let value = tokens.get(i + 2).and_then(|t| t.parse::<i32>().ok());
                score = match (next, value) {
                    (Some("cp"), Some(v)) => Some(Score::Cp(v)),
                    (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                    _ => score,
                };
                i += 2;
                // lowerbound / upperbound は捨てる
                if matches!(tokens.get(i + 1).copied(), Some("lowerbound" | "upperbound")) {
                    i += 1;
                }
            }
            "pv" => {
                pv = tokens[i + 1..].iter().map(|t| t.to_string()).collect();
                break;
            }
            _ => {}
        }
        i += 1;
    }

    Some(InfoLine {
        multipv,
        depth: depth.unwrap_or(0),
        seldepth,
        score: score?,
        pv,
        nodes,
        nps,
        time_ms,
        hashfull,
    })
}

/// `bestmove <move> [ponder <move>]` を解析する。
pub fn parse_bestmove_line(line: &str) -> Option<BestMove> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("bestmove") {
        return None;
    }
    let best = tokens
        .next()
        .filter(|mv| *mv != "(none)" && *mv != "0000")
        .map(str::to_string);
    let ponder = match (tokens.next(), tokens.next()) {
        (Some("ponder"), Some(mv)) => Some(mv.to_string()),
        _ => None,
    };
    Some(BestMove { best, ponder })
}
