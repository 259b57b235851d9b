//! 局面の検証と着手の適用。
//!
//! 合法性の判定は外部のルールライブラリに任せ、このクレートは [`Rules`] を通してだけ使う。

use cozy_chess::{Board, Color, File, Move, Piece, Square};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// 手番
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

pub trait Rules: Send + Sync + 'static {
    type Position: Clone + Send + Sync;

    /// FEN を解釈する。不正なら [`AnalysisError::InvalidPosition`]。
    fn parse_position(&self, fen: &str) -> Result<Self::Position>;

    fn start_position(&self) -> Self::Position;

    fn is_legal(&self, pos: &Self::Position, mv: &str) -> bool;

    /// 着手後の局面。非合法手なら [`AnalysisError::IllegalMove`]。
    fn apply(&self, pos: &Self::Position, mv: &str) -> Result<Self::Position>;

    fn side_to_move(&self, pos: &Self::Position) -> Side;

    /// 開始局面（`None` なら平手）から `moves` を順に適用した局面。
    fn replay<S: AsRef<str>>(&self, fen: Option<&str>, moves: &[S]) -> Result<Self::Position> {
        let mut pos = match fen {
            Some(fen) => self.parse_position(fen)?,
            None => self.start_position(),
        };
        for mv in moves {
            pos = self.apply(&pos, mv.as_ref())?;
        }
        Ok(pos)
    }
}

/// `cozy-chess` による [`Rules`] 実装
#[derive(Clone, Copy, Debug, Default)]
pub struct CozyRules;

impl CozyRules {
    /// UCI 表記（キャスリングは `e1g1` 形式）の手を合法手の中から探す。
    ///
    /// cozy-chess はキャスリングを「キングが自分のルークを取る」形で表すので、
    /// 比較の前に標準表記へ直す。
    fn find_move(board: &Board, uci: &str) -> Option<Move> {
        let mut found = None;
        board.generate_moves(|moves| {
            for mv in moves {
                if to_standard_uci(board, mv) == uci {
                    found = Some(mv);
                    return true;
                }
            }
            false
        });
        found
    }
}

fn to_standard_uci(board: &Board, mv: Move) -> String {
    let castles = board.piece_on(mv.from) == Some(Piece::King)
        && board.colors(board.side_to_move()).has(mv.to);
    if !castles {
        return mv.to_string();
    }
    let file = if mv.to.file() as u8 > mv.from.file() as u8 { File::G } else { File::C };
    format!("{}{}", mv.from, Square::new(file, mv.from.rank()))
}

impl Rules for CozyRules {
    type Position = Board;

    fn parse_position(&self, fen: &str) -> Result<Board> {
        Board::from_fen(fen.trim(), false).map_err(|e| AnalysisError::InvalidPosition {
            fen: fen.to_string(),
            reason: format!("{e:?}"),
        })
    }

    fn start_position(&self) -> Board {
        Board::default()
    }

    fn is_legal(&self, pos: &Board, mv: &str) -> bool {
        Self::find_move(pos, mv).is_some()
    }

    fn apply(&self, pos: &Board, mv: &str) -> Result<Board> {
        let Some(found) = Self::find_move(pos, mv) else {
            return Err(AnalysisError::IllegalMove { mv: mv.to_string() });
        };
        let mut next = pos.clone();
        next.play_unchecked(found);
        Ok(next)
    }

    fn side_to_move(&self, pos: &Board) -> Side {
        match pos.side_to_move() {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}
