//! Session 模組
//!
//! 一條連線對應一個 `Session`。可變狀態（設定、變數、歷史、觸發器、擷取、計時器）
//! 集中在一把讀寫鎖後面；接收、送出、保活在 `run` 中並行執行。
//!
//! 設定以 `Arc<Config>` 整份替換，讀取端永遠看到完整的快照。

mod commands;
mod receive;
mod send;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, Lists, Vars};
use crate::dump::ActiveDump;
use crate::expand::Expander;
use crate::history::History;
use crate::lines::LineReader;
use crate::logger::{spawn_log_writer, LogEntry, LogRouter};
use crate::output::OutputSink;
use crate::pattern::PatternCache;
use crate::telnet::{ConnWriter, TelnetError};
use crate::timers::{spawn_timers, TimerJob};
use crate::trigger::TriggerTable;

/// 保活停用時重新檢查設定的間隔
const KEEPALIVE_IDLE_CHECK: Duration = Duration::from_secs(60);

/// 會結束 session 的錯誤
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("讀取伺服器資料失敗: {0}")]
    Receive(#[source] io::Error),

    #[error("讀取輸入失敗: {0}")]
    Input(#[source] io::Error),

    #[error("寫入伺服器失敗: {0}")]
    Transport(#[source] io::Error),

    #[error(transparent)]
    Telnet(#[from] TelnetError),
}

/// 受鎖保護的可變狀態
struct SessionState {
    cfg: Arc<Config>,
    /// 寫時複製，展開時只需複製 Arc
    vars: Arc<Vars>,
    lists: Lists,
    history: History,
    triggers_disabled: bool,
    triggers: TriggerTable,
    last_tick: Option<Instant>,
    dump: Option<Arc<ActiveDump>>,
    timers: Option<CancellationToken>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            cfg: Arc::new(Config::default()),
            vars: Arc::new(Vars::new()),
            lists: Lists::new(),
            history: History::default(),
            triggers_disabled: false,
            triggers: TriggerTable::new(),
            last_tick: None,
            dump: None,
            timers: None,
        }
    }
}

/// 一條連線的執行期狀態與處理流程
pub struct Session {
    /// 日誌與擷取檔案的根目錄
    dir: PathBuf,
    conn: ConnWriter,
    output: OutputSink,
    patterns: Arc<PatternCache>,
    state: RwLock<SessionState>,
    log_tx: mpsc::UnboundedSender<LogEntry>,
}

impl Session {
    /// 創建 session 並啟動日誌 task
    ///
    /// 需在 tokio runtime 內呼叫。設定為空，之後以 `set_config` 載入。
    pub fn new(
        dir: impl Into<PathBuf>,
        conn: ConnWriter,
        output: OutputSink,
        patterns: Arc<PatternCache>,
    ) -> Self {
        let dir = dir.into();
        let (log_tx, _) = spawn_log_writer(LogRouter::new(dir.clone(), patterns.clone()));
        Self {
            dir,
            conn,
            output,
            patterns,
            state: RwLock::new(SessionState::default()),
            log_tx,
        }
    }

    /// 載入新設定
    ///
    /// 變數與清單以合併方式更新，已存在的值不被覆寫。舊的計時器在同一把寫鎖內
    /// 取消並以新設定重新啟動，因此不會有計時器使用已被替換的設定。
    pub fn set_config(&self, cfg: Config) {
        let cfg = Arc::new(cfg);
        for pattern in cfg.patterns() {
            if let Err(e) = self.patterns.get(pattern.as_str()) {
                self.output.info(format!("[ERROR: {}]", e));
            }
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        let vars = Arc::make_mut(&mut state.vars);
        for (k, v) in &cfg.vars {
            vars.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &cfg.lists {
            state.lists.entry(k.clone()).or_insert_with(|| v.clone());
        }
        state.triggers.load(&cfg.triggers);

        if let Some(old) = state.timers.take() {
            old.cancel();
        }
        let jobs = self.timer_jobs(&cfg, &state.vars);
        state.timers = Some(spawn_timers(jobs, self.conn.clone()));
        state.cfg = cfg;
        debug!("設定已套用");
    }

    fn timer_jobs(&self, cfg: &Config, vars: &Vars) -> Vec<TimerJob> {
        let expander = Expander::new(&cfg.aliases, vars);
        cfg.timers
            .iter()
            .filter_map(|timer| match expander.expand(&timer.command) {
                Ok(expansion) => Some(TimerJob {
                    every: timer.every,
                    lines: expansion
                        .commands
                        .iter()
                        .map(|cmd| Bytes::from(cfg.encoding.encode(cmd.as_bytes()).into_owned()))
                        .collect(),
                }),
                Err(e) => {
                    self.output.info(format!("[ERROR: timer {:?}: {}]", timer.command, e));
                    None
                }
            })
            .collect()
    }

    /// 持續套用收到的設定，直到發送端關閉
    pub async fn follow_config(&self, mut updates: mpsc::Receiver<Config>) {
        while let Some(cfg) = updates.recv().await {
            info!("重新載入設定");
            self.set_config(cfg);
            self.output.info("[config reloaded]");
        }
    }

    /// 目前的設定快照
    pub fn config(&self) -> Arc<Config> {
        self.state.read().cfg.clone()
    }

    /// 目前的變數快照
    pub fn vars(&self) -> Arc<Vars> {
        self.state.read().vars.clone()
    }

    pub fn list(&self, name: &str) -> Option<Vec<String>> {
        self.state.read().lists.get(name).cloned()
    }

    /// 由舊到新的命令歷史
    pub fn history(&self) -> Vec<String> {
        self.state.read().history.iter().cloned().collect()
    }

    pub fn triggers_enabled(&self) -> bool {
        !self.state.read().triggers_disabled
    }

    /// 最近一次偵測到 tick 的時間
    pub fn last_tick(&self) -> Option<Instant> {
        self.state.read().last_tick
    }

    /// 進行中的擷取名稱
    pub fn active_dump(&self) -> Option<String> {
        self.state.read().dump.as_ref().map(|d| d.name().to_string())
    }

    /// 該行是否為提示字元
    pub fn is_prompt(&self, line: &[u8]) -> bool {
        let cfg = self.config();
        cfg.prompt.as_ref().is_some_and(|p| p.is_match(&self.patterns, line))
    }

    /// 送出登入帳號與密碼
    pub fn login(&self) -> Result<(), SessionError> {
        let cfg = self.config();
        for field in [&cfg.login.name, &cfg.login.password] {
            if !field.is_empty() {
                self.conn.send_line(&cfg.encoding.encode(field.as_bytes()))?;
            }
        }
        Ok(())
    }

    /// 執行 session 直到伺服器或輸入端結束，或發生傳輸錯誤
    ///
    /// 伺服器送來的行與使用者輸入並行處理，兩者寫到同一條連線；
    /// 觸發器送出的命令與使用者輸入之間沒有保證的先後順序。
    /// 寫入 task 失敗時以 `SessionError::Transport` 結束。
    pub async fn run<R, I>(&self, reader: R, input: I) -> Result<(), SessionError>
    where
        R: AsyncRead + Unpin,
        I: AsyncRead + Unpin,
    {
        self.login()?;

        let result = tokio::select! {
            e = self.conn.failed() => Err(SessionError::Transport(e)),
            result = self.receive_loop(reader) => result,
            result = self.send_loop(input) => result,
            result = self.keepalive_loop() => result,
        };

        // 寫入失敗後送出只會得到 Closed，改報真正的原因
        if let Err(SessionError::Telnet(TelnetError::Closed)) = &result {
            if let Some(e) = self.conn.failure() {
                return Err(SessionError::Transport(e));
            }
        }
        result
    }

    async fn receive_loop<R: AsyncRead + Unpin>(&self, reader: R) -> Result<(), SessionError> {
        let mut lines = LineReader::new(reader);
        while let Some(line) = lines.next_line().await.map_err(SessionError::Receive)? {
            self.receive(&line).await?;
        }
        info!("伺服器已關閉連線");
        Ok(())
    }

    async fn send_loop<I: AsyncRead + Unpin>(&self, input: I) -> Result<(), SessionError> {
        let mut lines = LineReader::new(input);
        while let Some(line) = lines.next_line().await.map_err(SessionError::Input)? {
            self.send(&String::from_utf8_lossy(&line)).await?;
        }
        info!("輸入已結束");
        Ok(())
    }

    async fn keepalive_loop(&self) -> Result<(), SessionError> {
        loop {
            let every = self.config().keepalive;
            if every.is_zero() {
                tokio::time::sleep(KEEPALIVE_IDLE_CHECK).await;
                continue;
            }
            tokio::time::sleep(every).await;
            self.conn.send_line(b"")?;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(timers) = self.state.get_mut().timers.take() {
            timers.cancel();
        }
    }
}
