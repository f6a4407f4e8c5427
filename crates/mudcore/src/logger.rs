//! 日誌記錄模組
//!
//! 將伺服器輸出依設定路由到日誌檔。寫檔在專屬的 blocking task 中進行，
//! 接收迴圈只負責把行丟進 channel，不會被慢速的磁碟寫入拖住。

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{Config, LogRule};
use crate::pattern::PatternCache;

/// 日誌記錄錯誤
#[derive(Debug, Error)]
pub enum LogError {
    #[error("無法開啟日誌 {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("寫入日誌 {path} 失敗: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 送往日誌 task 的一筆資料：當時的設定快照與原始行
pub type LogEntry = (Arc<Config>, Bytes);

/// 時間戳格式（如 `3:04PM`）
const TIMESTAMP_FORMAT: &str = "%-I:%M%p";

/// 日誌路由器
///
/// 每個目的檔在第一次有內容時才以附加模式開啟，之後持續使用同一個檔案。
pub struct LogRouter {
    dir: PathBuf,
    patterns: Arc<PatternCache>,
    files: HashMap<String, File>,
}

impl LogRouter {
    pub fn new(dir: impl Into<PathBuf>, patterns: Arc<PatternCache>) -> Self {
        Self {
            dir: dir.into(),
            patterns,
            files: HashMap::new(),
        }
    }

    /// 將一行寫到所有符合的日誌，返回寫出的行數
    pub fn route(&mut self, cfg: &Config, line: &[u8]) -> usize {
        let mut written = 0;
        for (filename, rule) in &cfg.log {
            for out in self.render(rule, line) {
                match self.append(filename, &out) {
                    Ok(()) => written += 1,
                    Err(e) => warn!("{}", e),
                }
            }
        }
        written
    }

    fn render(&self, rule: &LogRule, line: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for (pattern, templates) in &rule.matches {
            if !pattern.is_match(&self.patterns, line) {
                continue;
            }
            for template in templates.split(';') {
                let mut out = Vec::new();
                if rule.timestamp {
                    let now = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
                    out.extend_from_slice(now.as_bytes());
                    out.push(b' ');
                }
                out.extend_from_slice(&pattern.expand(&self.patterns, line, template.trim()));
                out.push(b'\n');
                lines.push(out);
            }
        }
        lines
    }

    fn append(&mut self, filename: &str, data: &[u8]) -> Result<(), LogError> {
        let path = self.dir.join(filename);
        if !self.files.contains_key(filename) {
            let file = open_append(&path).map_err(|source| LogError::Open {
                path: path.clone(),
                source,
            })?;
            debug!("開啟日誌 {}", path.display());
            self.files.insert(filename.to_string(), file);
        }

        let Some(file) = self.files.get_mut(filename) else {
            return Ok(());
        };
        file.write_all(data).map_err(|source| LogError::Write { path, source })
    }
}

/// 以附加模式開啟（不存在則建立）
pub(crate) fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// 啟動日誌 task
///
/// 所有發送端關閉後 task 結束。需在 tokio runtime 內呼叫。
pub fn spawn_log_writer(
    mut router: LogRouter,
) -> (mpsc::UnboundedSender<LogEntry>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<LogEntry>();
    let handle = tokio::task::spawn_blocking(move || {
        while let Some((cfg, line)) = rx.blocking_recv() {
            router.route(&cfg, &line);
        }
    });
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_route_to_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            r#"{"log": {
                "tells.log": {"match": {"^(\\w+) tells you (.*)": "$1: $2"}},
                "all.log": {"match": {".": "$0"}}
            }}"#,
        );
        let mut router = LogRouter::new(dir.path(), Arc::new(PatternCache::new()));

        assert_eq!(router.route(&cfg, b"Bob tells you hello"), 2);
        assert_eq!(router.route(&cfg, b"It rains."), 1);

        let tells = std::fs::read_to_string(dir.path().join("tells.log")).unwrap();
        assert_eq!(tells, "Bob: hello\n");
        let all = std::fs::read_to_string(dir.path().join("all.log")).unwrap();
        assert_eq!(all, "Bob tells you hello\nIt rains.\n");
    }

    #[test]
    fn test_multiple_templates_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            r#"{"log": {"loot.log": {"timestamp": true, "match": {"You get (\\d+) gold": "gold $1; total++"}}}}"#,
        );
        let mut router = LogRouter::new(dir.path(), Arc::new(PatternCache::new()));

        assert_eq!(router.route(&cfg, b"You get 12 gold"), 2);

        let content = std::fs::read_to_string(dir.path().join("loot.log")).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" gold 12"));
        assert!(lines[1].ends_with(" total++"));
        assert!(lines[0].contains(':'));
    }

    #[test]
    fn test_no_file_until_first_match() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(r#"{"log": {"never.log": {"match": {"zzz": "$0"}}}}"#);
        let mut router = LogRouter::new(dir.path(), Arc::new(PatternCache::new()));

        assert_eq!(router.route(&cfg, b"abc"), 0);
        assert!(!dir.path().join("never.log").exists());
    }

    #[test]
    fn test_open_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            r#"{"log": {"missing/dir.log": {"match": {".": "$0"}}, "ok.log": {"match": {".": "$0"}}}}"#,
        );
        let mut router = LogRouter::new(dir.path(), Arc::new(PatternCache::new()));

        assert_eq!(router.route(&cfg, b"line"), 1);
        assert!(dir.path().join("ok.log").exists());
    }

    #[tokio::test]
    async fn test_writer_task_drains_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Arc::new(config(r#"{"log": {"out.log": {"match": {".": "$0"}}}}"#));
        let router = LogRouter::new(dir.path(), Arc::new(PatternCache::new()));

        let (tx, handle) = spawn_log_writer(router);
        tx.send((cfg.clone(), Bytes::from_static(b"first"))).unwrap();
        tx.send((cfg, Bytes::from_static(b"second"))).unwrap();
        drop(tx);
        handle.await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }
}
