//! Pattern（正則規則）模組
//!
//! `Pattern` 是純值型別，只保存原始字串；編譯結果放在注入的 `PatternCache` 中。
//! 同一字串在快取存活期間只編譯一次，編譯失敗的結果同樣被快取，不會重試。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::bytes::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::color::Color;

/// 正則編譯錯誤
#[derive(Debug, Clone, Error)]
#[error("無效的正則表達式 {pattern:?}: {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

/// 正則規則
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct Pattern(String);

impl Pattern {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 是否在輸入中任一處匹配；編譯失敗時返回 false
    pub fn is_match(&self, cache: &PatternCache, line: &[u8]) -> bool {
        cache.get(&self.0).map(|re| re.is_match(line)).unwrap_or(false)
    }

    /// 對每一個不重疊的匹配套用模板並串接結果
    ///
    /// 模板語法同 `regex`：`$1`、`${1}`、`$name`、`${name}`，`$$` 為字面的 `$`。
    pub fn expand(&self, cache: &PatternCache, content: &[u8], template: &str) -> Vec<u8> {
        let Ok(re) = cache.get(&self.0) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for caps in re.captures_iter(content) {
            caps.expand(template.as_bytes(), &mut out);
        }
        out
    }

    /// 以顏色包住每一個不重疊的匹配區段，其餘內容原樣保留
    pub fn colorize(&self, cache: &PatternCache, content: &[u8], color: Color) -> Vec<u8> {
        paint_spans(content, self.spans(cache, content).into_iter().map(|span| (span, color)))
    }

    /// 所有不重疊且非空的匹配區段
    pub fn spans(&self, cache: &PatternCache, content: &[u8]) -> Vec<Range<usize>> {
        let Ok(re) = cache.get(&self.0) else {
            return Vec::new();
        };
        re.find_iter(content)
            .filter(|m| m.start() < m.end())
            .map(|m| m.range())
            .collect()
    }
}

/// 依區段上色；區段須已排序且互不重疊
pub fn paint_spans(
    content: &[u8],
    spans: impl IntoIterator<Item = (Range<usize>, Color)>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 16);
    let mut last = 0;
    for (span, color) in spans {
        out.extend_from_slice(&content[last..span.start]);
        color.paint_into(&content[span.clone()], &mut out);
        last = span.end;
    }
    out.extend_from_slice(&content[last..]);
    out
}

/// 套用多條 highlight 規則
///
/// 所有區段都在原始內容上比對，重疊時先開始的區段優先，相同起點則以規則順序為準。
/// 沒有任何匹配時返回 `None`。
pub fn highlight<'a>(
    cache: &PatternCache,
    rules: impl IntoIterator<Item = (&'a Pattern, &'a Color)>,
    content: &[u8],
) -> Option<Vec<u8>> {
    let mut spans: Vec<(Range<usize>, Color)> = rules
        .into_iter()
        .flat_map(|(pattern, color)| {
            pattern
                .spans(cache, content)
                .into_iter()
                .map(move |span| (span, *color))
        })
        .collect();
    if spans.is_empty() {
        return None;
    }

    spans.sort_by_key(|(span, _)| span.start);
    let mut end = 0;
    spans.retain(|(span, _)| {
        let keep = span.start >= end;
        if keep {
            end = span.end;
        }
        keep
    });
    Some(paint_spans(content, spans))
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Compiled = Result<Arc<Regex>, PatternError>;

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, Compiled>,
    /// 插入順序，容量受限時淘汰最舊的
    order: VecDeque<String>,
}

/// 正則編譯快取
///
/// 讀寫鎖保護；兩個執行緒同時編譯同一字串是允許的，後到者沿用先寫入的結果。
#[derive(Debug, Default)]
pub struct PatternCache {
    inner: RwLock<CacheInner>,
    capacity: Option<usize>,
    compiles: AtomicUsize,
}

impl PatternCache {
    /// 不限容量的快取
    pub fn new() -> Self {
        Self::default()
    }

    /// 最多保留 `capacity` 個不同字串，超過時淘汰最早加入者
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    /// 取得編譯結果，必要時編譯並放入快取
    pub fn get(&self, source: &str) -> Result<Arc<Regex>, PatternError> {
        if let Some(compiled) = self.inner.read().entries.get(source) {
            return compiled.clone();
        }

        // regex 的語法錯誤訊息是多行的，只留最後的說明
        let compiled: Compiled = Regex::new(source).map(Arc::new).map_err(|e| PatternError {
            pattern: source.to_string(),
            message: e.to_string().lines().last().unwrap_or_default().trim().to_string(),
        });
        self.compiles.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = &compiled {
            warn!("{}", e);
        }

        let mut inner = self.inner.write();
        if let Some(existing) = inner.entries.get(source) {
            return existing.clone();
        }
        if let Some(capacity) = self.capacity {
            while inner.entries.len() >= capacity {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(source.to_string(), compiled.clone());
        inner.order.push_back(source.to_string());
        compiled
    }

    /// 編譯（含失敗）的累計次數
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }

    /// 快取中的項目數
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
