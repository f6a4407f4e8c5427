//! 擷取（dump）
//!
//! 把一段伺服器輸出寫進檔案：開始後（若有 start pattern 則等它出現）逐行寫入，
//! 直到 end pattern 出現。同一時間只允許一個擷取。

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::config::DumpConfig;
use crate::logger::open_append;
use crate::pattern::PatternCache;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("沒有名為 {0:?} 的擷取定義")]
    Unknown(String),

    #[error("擷取 {0:?} 進行中，請等它結束")]
    Busy(String),

    #[error("無法開啟 {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 進行中的擷取
#[derive(Debug)]
pub struct ActiveDump {
    name: String,
    def: DumpConfig,
    file: Mutex<File>,
    capturing: AtomicBool,
}

impl ActiveDump {
    /// 開啟目的檔（附加模式）
    pub fn open(dir: &Path, name: impl Into<String>, def: DumpConfig) -> Result<Self, DumpError> {
        let path = dir.join(&def.dest);
        let file = open_append(&path).map_err(|source| DumpError::Open { path, source })?;
        Ok(Self {
            name: name.into(),
            capturing: AtomicBool::new(def.start.is_none()),
            def,
            file: Mutex::new(file),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    /// 餵入一行；返回 true 表示擷取已結束
    ///
    /// end pattern 只在開始寫入後才生效，含 start 的那一行本身也會寫入。
    pub fn feed(&self, cache: &PatternCache, line: &[u8]) -> bool {
        if !self.is_capturing() {
            match &self.def.start {
                Some(start) if start.is_match(cache, line) => {
                    self.capturing.store(true, Ordering::Release)
                }
                _ => return false,
            }
        }

        let mut file = self.file.lock();
        if let Err(e) = file.write_all(line).and_then(|_| file.write_all(b"\n")) {
            warn!("擷取 {} 寫入失敗: {}", self.name, e);
        }

        let done = self.def.end.is_match(cache, line);
        if done {
            if let Err(e) = file.flush() {
                warn!("擷取 {} flush 失敗: {}", self.name, e);
            }
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;

    fn def(start: Option<&str>, end: &str) -> DumpConfig {
        DumpConfig {
            cmd: "score".to_string(),
            dest: "dump.txt".to_string(),
            start: start.map(Pattern::from),
            end: Pattern::from(end),
        }
    }

    #[test]
    fn test_capture_until_end() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PatternCache::new();
        let dump = ActiveDump::open(dir.path(), "score", def(None, "^--$")).unwrap();

        assert!(!dump.feed(&cache, b"Name: hero"));
        assert!(!dump.feed(&cache, b"Level: 3"));
        assert!(dump.feed(&cache, b"--"));
        drop(dump);

        let content = std::fs::read_to_string(dir.path().join("dump.txt")).unwrap();
        assert_eq!(content, "Name: hero\nLevel: 3\n--\n");
    }

    #[test]
    fn test_start_pattern_gates_capture() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PatternCache::new();
        let dump = ActiveDump::open(dir.path(), "eq", def(Some("^You are using"), "^$")).unwrap();

        assert!(!dump.feed(&cache, b""));
        assert!(!dump.feed(&cache, b"> "));
        assert!(!dump.is_capturing());
        assert!(!dump.feed(&cache, b"You are using:"));
        assert!(!dump.feed(&cache, b"<worn> a hat"));
        assert!(dump.feed(&cache, b""));
        drop(dump);

        let content = std::fs::read_to_string(dir.path().join("dump.txt")).unwrap();
        assert_eq!(content, "You are using:\n<worn> a hat\n\n");
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dump.txt"), "old\n").unwrap();
        let cache = PatternCache::new();

        let dump = ActiveDump::open(dir.path(), "score", def(None, "end")).unwrap();
        dump.feed(&cache, b"end");
        drop(dump);

        let content = std::fs::read_to_string(dir.path().join("dump.txt")).unwrap();
        assert_eq!(content, "old\nend\n");
    }

    #[test]
    fn test_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = def(None, "x");
        bad.dest = "no/such/dir/out.txt".to_string();
        assert!(matches!(
            ActiveDump::open(dir.path(), "bad", bad),
            Err(DumpError::Open { .. })
        ));
    }
}
