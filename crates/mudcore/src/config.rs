//! 設定模型
//!
//! `Config` 是一份不可變的快照，由外部載入後交給 `Session::set_config`。
//! 所有規則表都保留設定檔中的順序。

use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::color::Color;
use crate::duration;
use crate::encoding::Charset;
use crate::pattern::Pattern;

/// 變數表
pub type Vars = IndexMap<String, String>;

/// 具名清單
pub type Lists = IndexMap<String, Vec<String>>;

/// 預設的閒置保活間隔
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(5 * 60);

/// 預設的遊戲 tick 週期
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// 客戶端設定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 伺服器位址 `host:port`
    pub address: String,
    pub login: Login,
    /// 提示字元
    pub prompt: Option<Pattern>,
    /// 伺服器端字元編碼
    pub encoding: Charset,
    /// 觸發器：pattern → 命令模板
    pub triggers: IndexMap<Pattern, String>,
    /// 變數預設值，重新載入時不覆寫已存在的值
    pub vars: Vars,
    pub lists: Lists,
    pub aliases: IndexMap<String, String>,
    /// 日誌：檔名 → 規則
    pub log: IndexMap<String, LogRule>,
    /// 擷取定義：名稱 → 定義
    pub dump: IndexMap<String, DumpConfig>,
    pub highlight: IndexMap<Pattern, Color>,
    pub replace: IndexMap<Pattern, Replacement>,
    pub gag: Vec<Pattern>,
    pub timers: Vec<TimerConfig>,
    pub tick: TickConfig,
    /// 閒置保活間隔，`0s` 表示停用
    #[serde(deserialize_with = "duration::deserialize")]
    pub keepalive: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: String::new(),
            login: Login::default(),
            prompt: None,
            encoding: Charset::default(),
            triggers: IndexMap::new(),
            vars: Vars::new(),
            lists: Lists::new(),
            aliases: IndexMap::new(),
            log: IndexMap::new(),
            dump: IndexMap::new(),
            highlight: IndexMap::new(),
            replace: IndexMap::new(),
            gag: Vec::new(),
            timers: Vec::new(),
            tick: TickConfig::default(),
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

impl Config {
    /// 設定中出現的所有 pattern
    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.prompt
            .iter()
            .chain(self.triggers.keys())
            .chain(self.log.values().flat_map(|rule| rule.matches.keys()))
            .chain(
                self.dump
                    .values()
                    .flat_map(|dump| dump.start.iter().chain(std::iter::once(&dump.end))),
            )
            .chain(self.highlight.keys())
            .chain(self.replace.keys())
            .chain(self.gag.iter())
    }
}

/// 自動登入
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Login {
    pub name: String,
    pub password: String,
}

/// 單一日誌檔的規則
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogRule {
    /// 每行前加上時間
    pub timestamp: bool,
    /// pattern → 以 `;` 分隔的輸出模板
    #[serde(rename = "match")]
    pub matches: IndexMap<Pattern, String>,
}

/// 擷取定義
#[derive(Debug, Clone, Deserialize)]
pub struct DumpConfig {
    /// 開始擷取時送給伺服器的命令
    #[serde(default)]
    pub cmd: String,
    /// 目的檔案（相對於 session 目錄）
    pub dest: String,
    /// 出現後才開始寫入；未設定則立即開始
    #[serde(default)]
    pub start: Option<Pattern>,
    pub end: Pattern,
}

/// 替換規則
#[derive(Debug, Clone, Deserialize)]
pub struct Replacement {
    /// 展開模板，可引用 capture group
    pub with: String,
    #[serde(default)]
    pub color: Option<Color>,
}

/// 週期命令
#[derive(Debug, Clone, Deserialize)]
pub struct TimerConfig {
    #[serde(deserialize_with = "duration::deserialize")]
    pub every: Duration,
    #[serde(rename = "do")]
    pub command: String,
}

/// 遊戲 tick 偵測
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    #[serde(deserialize_with = "duration::deserialize")]
    pub duration: Duration,
    /// 出現任一子字串即視為 tick
    #[serde(rename = "match")]
    pub markers: Vec<String>,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            duration: DEFAULT_TICK,
            markers: Vec::new(),
        }
    }
}
