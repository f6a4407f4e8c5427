//! MUD Core Library
//!
//! 提供 MUD 客戶端的核心功能：
//! - `telnet`: Telnet 協定解析、選項協商與帶外事件分派
//! - `session`: 收送流程、客戶端命令、計時器
//! - `pattern`: 正規表示式快取與樣式操作
//! - `expand`: 別名與變數展開
//! - `config`: session 設定檔
//! - `encoding`: 字元編碼轉換
//! - `logger` / `dump`: 日誌與畫面擷取

pub mod color;
pub mod command;
pub mod config;
pub mod dump;
pub mod duration;
pub mod encoding;
pub mod expand;
pub mod history;
pub mod lines;
pub mod logger;
pub mod output;
pub mod pattern;
pub mod session;
pub mod telnet;
pub mod timers;
pub mod trigger;

pub use color::Color;
pub use command::ClientCommand;
pub use config::Config;
pub use encoding::Charset;
pub use expand::{Expander, Expansion};
pub use history::History;
pub use output::OutputSink;
pub use pattern::{Pattern, PatternCache, PatternError};
pub use session::{Session, SessionError};
pub use telnet::{connect, ConnWriter, TelnetConfig, TelnetConnection, TelnetError};
pub use trigger::{Trigger, TriggerTable};
