//! 字元編碼模組
//!
//! 伺服器端編碼（如台灣 MUD 常見的 Big5）與本地 UTF-8 之間的轉換。
//! 預設為 UTF-8，此時收發的位元組原樣通過。

use std::borrow::Cow;
use std::fmt;

use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("未知的字元編碼: {0}")]
pub struct UnknownCharset(pub String);

/// 伺服器端字元編碼
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Charset(&'static Encoding);

impl Charset {
    /// 以 WHATWG 標籤查找編碼，如 `big5`、`gbk`、`utf-8`
    pub fn for_label(label: &str) -> Result<Self, UnknownCharset> {
        Encoding::for_label(label.trim().as_bytes())
            .map(Self)
            .ok_or_else(|| UnknownCharset(label.to_string()))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    fn is_passthrough(&self) -> bool {
        self.0 == UTF_8
    }

    /// 將伺服器送來的位元組轉為 UTF-8
    ///
    /// 無效字元會被替換為 U+FFFD；UTF-8 模式下不做任何處理。
    ///
    /// # Example
    /// ```
    /// use mudcore::encoding::Charset;
    ///
    /// let big5 = Charset::for_label("big5").unwrap();
    /// assert_eq!(big5.decode(&[0xa7, 0x41, 0xa6, 0x6e]).as_ref(), "你好".as_bytes());
    /// ```
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        if self.is_passthrough() {
            return Cow::Borrowed(bytes);
        }
        match self.0.decode_without_bom_handling(bytes).0 {
            Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
            Cow::Owned(s) => Cow::Owned(s.into_bytes()),
        }
    }

    /// 將本地輸入轉為伺服器端編碼
    ///
    /// 無法編碼的字元以 HTML 數值參照替代（encoding_rs 的行為）。
    pub fn encode<'a>(&self, text: &'a [u8]) -> Cow<'a, [u8]> {
        if self.is_passthrough() {
            return Cow::Borrowed(text);
        }
        match String::from_utf8_lossy(text) {
            Cow::Borrowed(s) => self.0.encode(s).0,
            Cow::Owned(s) => Cow::Owned(self.0.encode(&s).0.into_owned()),
        }
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self(UTF_8)
    }
}

impl fmt::Debug for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Charset").field(&self.name()).finish()
    }
}

impl<'de> Deserialize<'de> for Charset {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Self::for_label(&label).map_err(serde::de::Error::custom)
    }
}
