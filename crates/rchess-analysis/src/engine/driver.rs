use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rchess_uci::command::{IS_READY, QUIT, STOP, UCI, UCI_NEW_GAME};
use rchess_uci::{
    InfoLine, go_command, parse_bestmove_line, parse_id_name, parse_info_line, parse_option_name,
    position_command, set_option_command,
};
use tokio::time::{Instant, timeout, timeout_at};

use super::process::{EngineProcess, Launcher};
use super::{AnalysisRequest, AnalysisResult, Engine};
use crate::config::{EngineConfig, EngineOptions};
use crate::error::{AnalysisError, Result};

/// ドライバの状態遷移: `Unstarted → Handshaking → Idle ⇄ Searching`、どこからでも `Disposed`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Unstarted,
    Handshaking,
    Idle,
    Searching,
    Disposed,
}

enum SearchEvent {
    Line(std::io::Result<Option<String>>),
    TimedOut,
    Aborted,
}

/// UCI エンジン 1 プロセスのドライバ。
///
/// 読み取りは常に現在の操作だけが行う（スロットの排他で 1 操作しか走らないため、行の振り分け先は
/// 常に 1 つに決まる）。中断・タイムアウトした探索が後から返す `bestmove` は
/// `stale_bestmoves` で数え、次の操作の前に読み捨てる。
pub struct EngineDriver {
    label: String,
    config: EngineConfig,
    launcher: Arc<dyn Launcher>,
    process: Option<EngineProcess>,
    state: DriverState,
    multipv: u32,
    advertised: HashSet<String>,
    engine_name: Option<String>,
    stale_bestmoves: u32,
}

impl EngineDriver {
    pub fn new(label: impl Into<String>, config: EngineConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            label: label.into(),
            config,
            launcher,
            process: None,
            state: DriverState::Unstarted,
            multipv: 1,
            advertised: HashSet::new(),
            engine_name: None,
            stale_bestmoves: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// 現在エンジンに設定されている MultiPV
    pub fn multipv(&self) -> u32 {
        self.multipv
    }

    /// `id name` で報告されたエンジン名
    pub fn engine_name(&self) -> Option<&str> {
        self.engine_name.as_deref()
    }

    pub fn supports_option(&self, name: &str) -> bool {
        self.advertised.contains(name)
    }

    pub fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(EngineProcess::is_alive)
    }

    pub async fn init(&mut self) -> Result<()> {
        let state = self.state;
        match state {
            DriverState::Disposed => {
                return Err(AnalysisError::ProcessNotRunning(format!("{}: disposed", self.label)));
            }
            DriverState::Idle | DriverState::Searching if self.is_running() => return Ok(()),
            _ => {}
        }
        if self.process.is_some() {
            log::warn!("{}: engine process exited, restarting", self.label);
        }

        let io = self
            .launcher
            .launch()
            .map_err(|e| AnalysisError::io(&self.label, e))?;
        self.process = Some(EngineProcess::new(io, self.label.clone()));
        self.state = DriverState::Handshaking;
        self.stale_bestmoves = 0;
        self.advertised.clear();
        self.multipv = 1;

        if let Err(e) = self.handshake().await {
            self.state = DriverState::Unstarted;
            self.process = None;
            return Err(e);
        }
        log::info!(
            "{}: engine ready ({})",
            self.label,
            self.engine_name.as_deref().unwrap_or("unknown engine")
        );
        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        self.send(UCI).await?;
        let deadline = Instant::now() + self.config.handshake_timeout();
        loop {
            let line = self.read_until(deadline, UCI).await?;
            if let Some(name) = parse_option_name(&line) {
                self.advertised.insert(name);
            } else if let Some(name) = parse_id_name(&line) {
                self.engine_name = Some(name.to_string());
            } else if line == "uciok" {
                break;
            }
        }
        self.sync_ready().await?;
        self.state = DriverState::Idle;
        let initial = self.config.initial_options();
        self.configure(initial).await
    }

    pub async fn configure(&mut self, options: EngineOptions) -> Result<()> {
        self.drain_stale().await?;
        for (name, value) in options.to_uci_pairs() {
            if !self.advertised.is_empty() && !self.advertised.contains(name) {
                log::debug!("{}: engine does not advertise option {name}, skipped", self.label);
                continue;
            }
            self.send(&set_option_command(name, &value)).await?;
            if name == "MultiPV" {
                if let Some(multipv) = options.multipv {
                    self.multipv = multipv;
                }
            }
        }
        self.sync_ready().await
    }

    pub async fn new_game(&mut self) -> Result<()> {
        self.drain_stale().await?;
        self.send(UCI_NEW_GAME).await?;
        self.sync_ready().await
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.drain_stale().await?;
        self.sync_ready().await
    }

    pub async fn stop(&mut self) -> Result<()> {
        if self.process.is_some() {
            self.send(STOP).await?;
        }
        Ok(())
    }

    pub async fn dispose(&mut self) {
        self.state = DriverState::Disposed;
        let Some(mut process) = self.process.take() else {
            return;
        };
        if let Err(e) = process.write_line(QUIT).await {
            log::debug!("{}: failed to send quit: {e}", self.label);
        }
        if let Some(mut child) = process.take_child() {
            if timeout(self.config.quit_timeout(), child.wait()).await.is_err() {
                log::warn!(
                    "{}: engine did not exit within {:?}, killing it",
                    self.label,
                    self.config.quit_timeout()
                );
                if let Err(e) = child.kill().await {
                    log::debug!("{}: failed to kill engine: {e}", self.label);
                }
            }
        }
        log::info!("{}: engine disposed", self.label);
    }

    /// 解析を 1 回行う。MultiPV を変更した場合は成否にかかわらず元の値に戻す。
    pub async fn analyze(&mut self, request: AnalysisRequest) -> Result<AnalysisResult> {
        if request.is_cancelled() {
            return Err(AnalysisError::AnalysisAborted);
        }
        let previous = self.multipv;
        let wanted = request.multipv.unwrap_or(previous).max(1);
        if wanted == previous {
            return self.search(&request).await;
        }

        let result = match self.configure(EngineOptions::multipv(wanted)).await {
            Ok(()) => self.search(&request).await,
            Err(e) => Err(e),
        };
        let restored = self.configure(EngineOptions::multipv(previous)).await;
        if restored.is_err() {
            // 設定を戻せないエンジンは使い続けない
            self.discard_process();
        }
        match (result, restored) {
            (Ok(_), Err(e)) => Err(e),
            (result, Err(e)) => {
                log::warn!("{}: failed to restore MultiPV {previous}: {e}", self.label);
                result
            }
            (result, Ok(())) => result,
        }
    }

    async fn search(&mut self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        self.drain_stale().await?;
        self.send(&position_command(&request.position, &request.moves)).await?;
        self.send(&go_command(&request.limits)).await?;
        self.state = DriverState::Searching;

        let search_timeout = self.config.search_timeout();
        let deadline = Instant::now() + search_timeout;
        let cancel = request.cancel.clone().unwrap_or_default();
        // ランクごとに最後に届いた info 行だけを残す
        let mut lines: BTreeMap<u32, InfoLine> = BTreeMap::new();

        loop {
            let process = self.process_mut()?;
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => SearchEvent::Aborted,
                read = timeout_at(deadline, process.next_line()) => match read {
                    Ok(line) => SearchEvent::Line(line),
                    Err(_) => SearchEvent::TimedOut,
                },
            };

            let line = match event {
                SearchEvent::Aborted => {
                    self.abandon_search().await;
                    return Err(AnalysisError::AnalysisAborted);
                }
                SearchEvent::TimedOut => {
                    log::warn!("{}: no bestmove within {:?}", self.label, search_timeout);
                    self.abandon_search().await;
                    return Err(AnalysisError::SearchTimeout {
                        timeout_ms: duration_to_millis(search_timeout),
                    });
                }
                SearchEvent::Line(read) => self.expect_line(read)?,
            };

            if let Some(info) = parse_info_line(&line) {
                if let Some(on_info) = &request.on_info {
                    on_info(&info);
                }
                lines.insert(info.multipv, info);
            } else if let Some(best) = parse_bestmove_line(&line) {
                self.state = DriverState::Idle;
                return Ok(AnalysisResult {
                    best_move: best.best,
                    ponder: best.ponder,
                    lines: lines.into_values().collect(),
                });
            }
        }
    }

    /// 探索を打ち切る。`stop` への応答の `bestmove` は次の操作が読み捨てる。
    async fn abandon_search(&mut self) {
        if let Err(e) = self.send(STOP).await {
            log::debug!("{}: failed to send stop: {e}", self.label);
        }
        self.stale_bestmoves += 1;
        self.state = DriverState::Idle;
    }

    async fn drain_stale(&mut self) -> Result<()> {
        if self.stale_bestmoves == 0 {
            return Ok(());
        }
        let deadline = Instant::now() + self.config.handshake_timeout();
        while self.stale_bestmoves > 0 {
            match self.read_until(deadline, STOP).await {
                Ok(line) if line.starts_with("bestmove") => self.stale_bestmoves -= 1,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("{}: no bestmove after stop, discarding the process: {e}", self.label);
                    self.discard_process();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// プロセスを捨てる。次の `init` で起動し直し、既定の設定から始める。
    fn discard_process(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Some(mut child) = process.take_child() {
                if let Err(e) = child.start_kill() {
                    log::debug!("{}: failed to kill engine: {e}", self.label);
                }
            }
        }
        if self.state != DriverState::Disposed {
            self.state = DriverState::Unstarted;
        }
        self.stale_bestmoves = 0;
        self.multipv = self.config.multipv;
    }

    async fn sync_ready(&mut self) -> Result<()> {
        self.send(IS_READY).await?;
        let deadline = Instant::now() + self.config.handshake_timeout();
        loop {
            if self.read_until(deadline, IS_READY).await? == "readyok" {
                return Ok(());
            }
        }
    }

    async fn read_until(&mut self, deadline: Instant, command: &'static str) -> Result<String> {
        let timeout_ms = self.config.handshake_timeout_ms;
        let process = self.process_mut()?;
        let read = timeout_at(deadline, process.next_line()).await;
        match read {
            Ok(read) => self.expect_line(read),
            Err(_) => Err(AnalysisError::HandshakeTimeout { command, timeout_ms }),
        }
    }

    fn expect_line(&mut self, read: std::io::Result<Option<String>>) -> Result<String> {
        match read {
            Ok(Some(line)) => Ok(line),
            Ok(None) => {
                self.state = DriverState::Unstarted;
                Err(AnalysisError::ProcessNotRunning(format!(
                    "{}: engine closed its output",
                    self.label
                )))
            }
            Err(e) => Err(AnalysisError::io(&self.label, e)),
        }
    }

    async fn send(&mut self, msg: &str) -> Result<()> {
        let Some(process) = self.process.as_mut() else {
            return Err(AnalysisError::ProcessNotRunning(format!("{}: not started", self.label)));
        };
        process.write_line(msg).await.map_err(|e| AnalysisError::io(&self.label, e))
    }

    fn process_mut(&mut self) -> Result<&mut EngineProcess> {
        let label = &self.label;
        self.process
            .as_mut()
            .ok_or_else(|| AnalysisError::ProcessNotRunning(format!("{label}: not started")))
    }
}

impl Engine for EngineDriver {
    async fn init(&mut self) -> Result<()> {
        EngineDriver::init(self).await
    }

    async fn configure(&mut self, options: EngineOptions) -> Result<()> {
        EngineDriver::configure(self, options).await
    }

    async fn new_game(&mut self) -> Result<()> {
        EngineDriver::new_game(self).await
    }

    async fn analyze(&mut self, request: AnalysisRequest) -> Result<AnalysisResult> {
        EngineDriver::analyze(self, request).await
    }

    async fn stop(&mut self) -> Result<()> {
        EngineDriver::stop(self).await
    }

    async fn dispose(&mut self) {
        EngineDriver::dispose(self).await
    }

    async fn ping(&mut self) -> Result<()> {
        EngineDriver::ping(self).await
    }
}

fn duration_to_millis(d: std::time::Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
