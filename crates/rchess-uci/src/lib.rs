//! UCI プロトコルのコーデック。
//!
//! エンジンが出力する行（`info` / `bestmove` / `option` / `id`）を構造化し、
//! エンジンへ送るコマンドを組み立てる。状態を持たない関数のみで構成する。

pub mod command;
pub mod info;
pub mod score;

pub use command::{
    DEFAULT_MOVETIME_MS, SearchLimits, StartPosition, go_command, parse_id_name,
    parse_option_name, position_command, set_option_command,
};
pub use info::{BestMove, InfoLine, parse_bestmove_line, parse_info_line};
pub use score::Score;
