//! 使用者可見的輸出
//!
//! 每一個邏輯行寫一次；寫入失敗只記錄，不影響 session。

use std::fmt::Display;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::color::RESET;

/// 一般訊息（藍色）
const INFO: &[u8] = b"\x1b[34m";
/// 提醒（亮洋紅）
const ALERT: &[u8] = b"\x1b[95m";

/// 輸出端，可複製給多個 task 共用
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// 寫到記憶體，供測試或嵌入者檢查
    pub fn capture() -> (Self, Captured) {
        let captured = Captured::default();
        (Self::new(captured.clone()), captured)
    }

    /// 原樣寫入
    pub fn write_raw(&self, bytes: &[u8]) {
        let mut w = self.inner.lock();
        if let Err(e) = w.write_all(bytes).and_then(|_| w.flush()) {
            warn!("輸出失敗: {}", e);
        }
    }

    /// 寫入一行（自動補換行）
    pub fn line(&self, bytes: &[u8]) {
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.extend_from_slice(bytes);
        buf.push(b'\n');
        self.write_raw(&buf);
    }

    /// 純文字一行
    pub fn text(&self, msg: impl Display) {
        self.line(msg.to_string().as_bytes());
    }

    /// 客戶端訊息，如 `[trigger: ...]`
    pub fn info(&self, msg: impl Display) {
        self.styled(INFO, msg);
    }

    /// 需要注意的提醒，如 tick 即將到來
    pub fn alert(&self, msg: impl Display) {
        self.styled(ALERT, msg);
    }

    fn styled(&self, style: &[u8], msg: impl Display) {
        let mut buf = Vec::new();
        buf.extend_from_slice(style);
        buf.extend_from_slice(msg.to_string().as_bytes());
        buf.extend_from_slice(RESET);
        self.line(&buf);
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

/// 記憶體中的輸出
#[derive(Debug, Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    /// 以行為單位，去除 ANSI 樣式
    pub fn lines(&self) -> Vec<String> {
        let raw = String::from_utf8_lossy(&self.0.lock()).into_owned();
        raw.lines().map(strip_ansi).collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 去除 `ESC [ ... m` 樣式序列
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
