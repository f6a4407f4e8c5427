//! 顏色模組
//!
//! 設定檔中的具名顏色，以 ANSI SGR 序列輸出

use serde::Deserialize;

/// ANSI 重置序列
pub const RESET: &[u8] = b"\x1b[0m";

/// 設定檔可用的顏色（皆為粗體）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Magenta,
    White,
}

impl Color {
    /// SGR 參數
    pub fn sgr(&self) -> &'static str {
        match self {
            Self::Red => "91;1",
            Self::Orange => "33;1",
            Self::Yellow => "93;1",
            Self::Green => "32;1",
            Self::Blue => "96;1",
            Self::Purple => "35;1",
            Self::Magenta => "95;1",
            Self::White => "97;1",
        }
    }

    /// 以此顏色包住文字
    pub fn paint(&self, text: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() + 12);
        self.paint_into(text, &mut out);
        out
    }

    /// 以此顏色包住文字並附加到 `out`
    pub fn paint_into(&self, text: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(b"\x1b[");
        out.extend_from_slice(self.sgr().as_bytes());
        out.push(b'm');
        out.extend_from_slice(text);
        out.extend_from_slice(RESET);
    }
}
