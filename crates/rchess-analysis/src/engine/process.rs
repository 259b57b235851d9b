use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};

pub type EngineReader = Box<dyn AsyncRead + Send + Unpin>;
pub type EngineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 起動直後のエンジンの入出力。`child` はテスト用のインプロセスエンジンでは `None`。
pub struct EngineIo {
    pub child: Option<Child>,
    pub reader: EngineReader,
    pub writer: EngineWriter,
}

/// エンジンプロセスの起動方法
pub trait Launcher: Send + Sync {
    fn launch(&self) -> io::Result<EngineIo>;
}

impl<F> Launcher for F
where
    F: Fn() -> io::Result<EngineIo> + Send + Sync,
{
    fn launch(&self) -> io::Result<EngineIo> {
        self()
    }
}

/// 実行ファイルを子プロセスとして起動する。
#[derive(Clone, Debug)]
pub struct CommandLauncher {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(path: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { path: path.into(), args }
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self) -> io::Result<EngineIo> {
        let mut child = Command::new(&self.path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                io::Error::new(e.kind(), format!("failed to spawn engine at {}: {e}", self.path.display()))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "no stdout"))?;
        Ok(EngineIo { child: Some(child), reader: Box::new(stdout), writer: Box::new(stdin) })
    }
}

/// 1 本のエンジンに対する行単位の入出力をカプセル化する。
pub struct EngineProcess {
    child: Option<Child>,
    lines: Lines<BufReader<EngineReader>>,
    writer: EngineWriter,
    closed: bool,
    label: String,
}

impl EngineProcess {
    pub fn new(io: EngineIo, label: impl Into<String>) -> Self {
        Self {
            child: io.child,
            lines: BufReader::new(io.reader).lines(),
            writer: io.writer,
            closed: false,
            label: label.into(),
        }
    }

    pub async fn write_line(&mut self, msg: &str) -> io::Result<()> {
        log::debug!("{} > {msg}", self.label);
        self.writer.write_all(msg.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// 次の 1 行。出力が閉じられたら `None`。
    ///
    /// `Lines::next_line` と同じく cancel safe なので `select!` の分岐に置いてよい。
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        match self.lines.next_line().await? {
            Some(line) => {
                let line = line.trim_end_matches('\r').to_string();
                log::trace!("{} < {line}", self.label);
                Ok(Some(line))
            }
            None => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    pub fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }
}
