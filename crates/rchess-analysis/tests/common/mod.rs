//! Test doubles shared by the integration tests.
//!
//! - [`FakeUci`]: an in-process UCI engine served over `tokio::io::duplex`, driven by
//!   a real [`EngineDriver`]. Every line in both directions is kept in a transcript.
//! - [`ProbeEngine`]: an [`Engine`] that skips the protocol and only records how the
//!   pool calls it.

#![allow(dead_code)] // Each test file uses a different subset

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rchess_analysis::config::{EngineConfig, EngineOptions};
use rchess_analysis::engine::{EngineIo, Launcher};
use rchess_analysis::{
    AnalysisError, AnalysisRequest, AnalysisResult, Engine, EngineDriver, EnginePool, InfoLine,
    Score,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

pub const ENGINE_NAME: &str = "FakeFish 1.0";
pub const ADVERTISED: &[&str] = &["Threads", "Hash", "MultiPV"];

/// Position and configuration the fake engine sees when it receives `go`.
#[derive(Clone, Debug, Default)]
pub struct SearchContext {
    pub multipv: u32,
    pub fen: Option<String>,
    pub moves: Vec<String>,
}

pub enum SearchReply {
    /// Write these lines (normally `info ...` followed by `bestmove ...`).
    Lines(Vec<String>),
    /// Stay silent until `stop`, then answer `bestmove (none)`.
    Hang,
    /// Ignore `stop` and write these lines only after the delay.
    Wedged(Duration, Vec<String>),
    /// Close the engine's output.
    Crash,
}

pub type Responder = Arc<dyn Fn(&SearchContext) -> SearchReply + Send + Sync>;

#[derive(Clone)]
pub struct FakeUci {
    responder: Responder,
    search_delay: Duration,
    answer_uci: bool,
    hidden_options: Vec<&'static str>,
    transcript: Arc<Mutex<Vec<String>>>,
    launches: Arc<AtomicUsize>,
}

impl FakeUci {
    pub fn new(responder: impl Fn(&SearchContext) -> SearchReply + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            search_delay: Duration::ZERO,
            answer_uci: true,
            hidden_options: Vec::new(),
            transcript: Arc::default(),
            launches: Arc::default(),
        }
    }

    /// Answers every `go` with one line per MultiPV rank. Rank `k` starts with
    /// `moves[k - 1]` and scores `base - 10 * (k - 1)` centipawns.
    pub fn ranked(moves: &'static [&'static str], base: i32) -> Self {
        Self::new(move |ctx| SearchReply::Lines(ranked_lines(ctx.multipv, moves, base)))
    }

    pub fn hanging() -> Self {
        Self::new(|_| SearchReply::Hang)
    }

    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = delay;
        self
    }

    /// Never answers `uci`.
    pub fn mute(mut self) -> Self {
        self.answer_uci = false;
        self
    }

    /// Leaves `name` out of the advertised options.
    pub fn without_option(mut self, name: &'static str) -> Self {
        self.hidden_options.push(name);
        self
    }

    pub fn launcher(&self) -> Arc<dyn Launcher> {
        let fake = self.clone();
        Arc::new(move || -> io::Result<EngineIo> {
            fake.launches.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(64 * 1024);
            tokio::spawn(fake.clone().serve(server));
            let (reader, writer) = tokio::io::split(client);
            Ok(EngineIo { child: None, reader: Box::new(reader), writer: Box::new(writer) })
        })
    }

    pub fn driver(&self, config: EngineConfig) -> EngineDriver {
        EngineDriver::new("fake", config, self.launcher())
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Every line seen by the fake: `> ` prefixes commands, `< ` prefixes replies.
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().unwrap().clone()
    }

    /// Commands received, without the `> ` prefix.
    pub fn commands(&self) -> Vec<String> {
        self.transcript()
            .into_iter()
            .filter_map(|line| line.strip_prefix("> ").map(str::to_string))
            .collect()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, line: String) {
        self.transcript.lock().unwrap().push(line);
    }

    async fn serve(self, stream: DuplexStream) {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        let mut ctx = SearchContext { multipv: 1, ..SearchContext::default() };
        let mut hanging = false;

        while let Ok(Some(line)) = lines.next_line().await {
            self.record(format!("> {line}"));
            let mut tokens = line.split_whitespace();
            let replies = match tokens.next() {
                Some("uci") if self.answer_uci => {
                    let mut out = vec![format!("id name {ENGINE_NAME}"), "id author tests".to_string()];
                    out.extend(
                        ADVERTISED
                            .iter()
                            .filter(|name| !self.hidden_options.contains(*name))
                            .map(|name| format!("option name {name} type spin default 1 min 1 max 512")),
                    );
                    out.push("uciok".to_string());
                    out
                }
                Some("isready") => vec!["readyok".to_string()],
                Some("setoption") => {
                    let rest: Vec<&str> = tokens.collect();
                    if let ["name", "MultiPV", "value", value] = rest.as_slice() {
                        ctx.multipv = value.parse().unwrap_or(1);
                    }
                    Vec::new()
                }
                Some("position") => {
                    let rest: Vec<&str> = tokens.collect();
                    let moves_at = rest.iter().position(|t| *t == "moves");
                    let head = &rest[..moves_at.unwrap_or(rest.len())];
                    ctx.fen = match head {
                        ["fen", fen @ ..] => Some(fen.join(" ")),
                        _ => None,
                    };
                    ctx.moves = moves_at
                        .map(|i| rest[i + 1..].iter().map(|m| m.to_string()).collect())
                        .unwrap_or_default();
                    Vec::new()
                }
                Some("go") => {
                    if !self.search_delay.is_zero() {
                        tokio::time::sleep(self.search_delay).await;
                    }
                    match (self.responder)(&ctx) {
                        SearchReply::Lines(out) => out,
                        SearchReply::Hang => {
                            hanging = true;
                            Vec::new()
                        }
                        SearchReply::Wedged(delay, out) => {
                            tokio::time::sleep(delay).await;
                            out
                        }
                        SearchReply::Crash => return,
                    }
                }
                Some("stop") if hanging => {
                    hanging = false;
                    vec!["bestmove (none)".to_string()]
                }
                Some("quit") => return,
                _ => Vec::new(),
            };
            for reply in replies {
                self.record(format!("< {reply}"));
                if writer.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}

pub fn ranked_lines(multipv: u32, moves: &[&str], base: i32) -> Vec<String> {
    let mut out = Vec::new();
    for rank in 1..=multipv.max(1) {
        let idx = (rank as usize - 1) % moves.len();
        let cp = base - 10 * (rank as i32 - 1);
        out.push(format!(
            "info depth 12 seldepth 16 multipv {rank} score cp {cp} nodes 1000 nps 50000 time 20 pv {} e7e5",
            moves[idx]
        ));
    }
    out.push(format!("bestmove {} ponder e7e5", moves[0]));
    out
}

/// Short timeouts so the paused clock reaches them quickly.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        handshake_timeout_ms: 500,
        search_timeout_ms: 2_000,
        quit_timeout_ms: 100,
        ..EngineConfig::default()
    }
}

/// Shared counters for every [`ProbeEngine`] of one pool.
#[derive(Default)]
pub struct ProbeStats {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub fail_new_game: AtomicBool,
    /// `(slot, operation)` in the order operations started
    events: Mutex<Vec<(usize, String)>>,
}

impl ProbeStats {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<(usize, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.events().iter().filter(|(_, e)| e == op).count()
    }
}

/// Engine double that asserts it is never entered twice at once.
///
/// `analyze` fails with `SearchTimeout` when the last requested move is `"fail"`,
/// otherwise it answers with `best_move = moves.join(",")`.
pub struct ProbeEngine {
    slot: usize,
    busy: AtomicBool,
    delay: Duration,
    stats: Arc<ProbeStats>,
}

impl ProbeEngine {
    pub fn new(slot: usize, delay: Duration, stats: Arc<ProbeStats>) -> Self {
        Self { slot, busy: AtomicBool::new(false), delay, stats }
    }

    async fn op(&self, name: &str) {
        assert!(!self.busy.swap(true, Ordering::SeqCst), "re-entrant {name} on slot {}", self.slot);
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.stats.events.lock().unwrap().push((self.slot, name.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl Engine for ProbeEngine {
    async fn init(&mut self) -> rchess_analysis::Result<()> {
        Ok(())
    }

    async fn configure(&mut self, _options: EngineOptions) -> rchess_analysis::Result<()> {
        self.op("configure").await;
        Ok(())
    }

    async fn new_game(&mut self) -> rchess_analysis::Result<()> {
        self.op("new_game").await;
        if self.stats.fail_new_game.load(Ordering::SeqCst) {
            return Err(AnalysisError::ProcessNotRunning("probe".to_string()));
        }
        Ok(())
    }

    async fn analyze(&mut self, request: AnalysisRequest) -> rchess_analysis::Result<AnalysisResult> {
        self.op("analyze").await;
        if request.moves.last().map(String::as_str) == Some("fail") {
            return Err(AnalysisError::SearchTimeout { timeout_ms: 0 });
        }
        Ok(AnalysisResult {
            best_move: Some(request.moves.join(",")),
            ponder: None,
            lines: vec![InfoLine {
                multipv: 1,
                depth: 1,
                seldepth: None,
                score: Score::Cp(0),
                pv: vec!["e2e4".to_string()],
                nodes: None,
                nps: None,
                time_ms: None,
                hashfull: None,
            }],
        })
    }

    async fn stop(&mut self) -> rchess_analysis::Result<()> {
        Ok(())
    }

    async fn dispose(&mut self) {}

    async fn ping(&mut self) -> rchess_analysis::Result<()> {
        self.op("ping").await;
        Ok(())
    }
}

pub fn probe_pool(size: usize, delay: Duration) -> (Arc<EnginePool<ProbeEngine>>, Arc<ProbeStats>) {
    let stats = Arc::new(ProbeStats::default());
    let engines = (0..size).map(|slot| ProbeEngine::new(slot, delay, stats.clone())).collect();
    (Arc::new(EnginePool::new(engines)), stats)
}
