//! 対局 ID とプールのスロットの対応、および対局ごとの棋譜の管理。

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rchess_uci::{SearchLimits, StartPosition};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::engine::{AnalysisRequest, AnalysisResult, Engine};
use crate::error::{AnalysisError, Result};
use crate::pool::{EnginePool, SlotId};
use crate::rules::{CozyRules, Rules};

/// 進行中の 1 局。スロットは対局中ずっと同じものに固定される。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    pub game_id: String,
    pub worker_id: SlotId,
    /// 指された手（UCI 座標表記）。追記のみ
    pub moves: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_fen: Option<String>,
}

impl GameSession {
    pub fn start_position(&self) -> StartPosition {
        StartPosition::from_fen(self.initial_fen.as_deref())
    }
}

pub struct GameRegistry<E, R = CozyRules> {
    pool: Arc<EnginePool<E>>,
    rules: R,
    games: Mutex<HashMap<String, GameSession>>,
}

impl<E: Engine> GameRegistry<E> {
    pub fn new(pool: Arc<EnginePool<E>>) -> Self {
        Self::with_rules(pool, CozyRules)
    }
}

impl<E: Engine, R: Rules> GameRegistry<E, R> {
    pub fn with_rules(pool: Arc<EnginePool<E>>, rules: R) -> Self {
        Self { pool, rules, games: Mutex::new(HashMap::new()) }
    }

    pub fn pool(&self) -> &Arc<EnginePool<E>> {
        &self.pool
    }

    pub fn game_count(&self) -> usize {
        self.games().len()
    }

    /// 対局を登録し、スロットを 1 つ割り当てる。
    ///
    /// ID の重複と開始局面の検証はスロット確保より前に行う。`ucinewgame` に失敗した場合や、
    /// 同じ ID の登録に競り負けた場合は確保したスロットを返却してから失敗する。
    pub async fn start_game(&self, game_id: &str, fen: Option<&str>) -> Result<GameSession> {
        if self.games().contains_key(game_id) {
            return Err(AnalysisError::GameAlreadyExists(game_id.to_string()));
        }
        if let Some(fen) = fen {
            self.rules.parse_position(fen)?;
        }

        let lease = self.pool.lease().await?;
        self.pool.new_game(lease.id()).await?;

        let session = GameSession {
            game_id: game_id.to_string(),
            worker_id: lease.id(),
            moves: Vec::new(),
            initial_fen: fen.map(str::to_string),
        };
        match self.games().entry(game_id.to_string()) {
            Entry::Occupied(_) => return Err(AnalysisError::GameAlreadyExists(game_id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(session.clone());
            }
        }
        lease.detach();
        log::info!("game {game_id} started on worker {}", session.worker_id);
        Ok(session)
    }

    /// 着手を検証して棋譜に追記する。非合法手なら棋譜は変わらない。
    pub fn add_move(&self, game_id: &str, mv: &str) -> Result<()> {
        let mut games = self.games();
        let session = games
            .get_mut(game_id)
            .ok_or_else(|| AnalysisError::GameNotFound(game_id.to_string()))?;
        let position = self.rules.replay(session.initial_fen.as_deref(), &session.moves)?;
        if !self.rules.is_legal(&position, mv) {
            return Err(AnalysisError::IllegalMove { mv: mv.to_string() });
        }
        session.moves.push(mv.to_string());
        Ok(())
    }

    /// 対局を削除してスロットを返却する。既に存在しなければ `GameNotFound`。
    pub fn end_game(&self, game_id: &str) -> Result<()> {
        let session = self
            .games()
            .remove(game_id)
            .ok_or_else(|| AnalysisError::GameNotFound(game_id.to_string()))?;
        self.pool.release(session.worker_id)?;
        log::info!("game {game_id} ended, worker {} released", session.worker_id);
        Ok(())
    }

    pub fn get_game(&self, game_id: &str) -> Result<GameSession> {
        self.with_game(game_id, GameSession::clone)
    }

    pub fn get_moves(&self, game_id: &str) -> Result<Vec<String>> {
        self.with_game(game_id, |session| session.moves.clone())
    }

    pub fn get_worker_id(&self, game_id: &str) -> Result<SlotId> {
        self.with_game(game_id, |session| session.worker_id)
    }

    pub fn get_initial_position(&self, game_id: &str) -> Result<Option<String>> {
        self.with_game(game_id, |session| session.initial_fen.clone())
    }

    /// 対局の現局面を、その対局に割り当てたスロットで解析する。
    pub async fn analyze_game(
        &self,
        game_id: &str,
        limits: SearchLimits,
        multipv: Option<u32>,
        cancel: Option<CancellationToken>,
    ) -> Result<AnalysisResult> {
        let session = self.get_game(game_id)?;
        let mut request =
            AnalysisRequest::new(session.start_position(), session.moves).with_limits(limits);
        request.multipv = multipv;
        request.cancel = cancel;
        self.pool.analyze_with_worker(session.worker_id, request).await
    }

    fn with_game<T>(&self, game_id: &str, f: impl FnOnce(&GameSession) -> T) -> Result<T> {
        self.games()
            .get(game_id)
            .map(f)
            .ok_or_else(|| AnalysisError::GameNotFound(game_id.to_string()))
    }

    fn games(&self) -> MutexGuard<'_, HashMap<String, GameSession>> {
        self.games.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
