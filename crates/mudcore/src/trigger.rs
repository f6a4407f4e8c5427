//! Trigger（觸發器）模組
//!
//! 設定檔中的常駐觸發器與 `/on` 建立的一次性觸發器放在同一張表，以旗標區分。
//! 比對時只收集結果，不修改表；一次性觸發器由呼叫端在觸發前以 `consume` 移除。

use indexmap::IndexMap;

use crate::pattern::{Pattern, PatternCache};

/// 觸發器定義
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub id: u64,
    pub pattern: Pattern,
    /// 命令模板，可引用 capture group
    pub template: String,
    /// 觸發一次後移除
    pub once: bool,
}

/// 觸發器匹配結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    pub id: u64,
    pub once: bool,
    /// 模板對該行展開後的命令
    pub command: String,
}

/// 觸發器表
#[derive(Debug, Default)]
pub struct TriggerTable {
    triggers: Vec<Trigger>,
    next_id: u64,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// 以新設定替換常駐觸發器，保留尚未觸發的一次性觸發器
    pub fn load(&mut self, triggers: &IndexMap<Pattern, String>) {
        let pending: Vec<Trigger> = self.triggers.drain(..).filter(|t| t.once).collect();

        for (pattern, template) in triggers {
            let id = self.alloc_id();
            self.triggers.push(Trigger {
                id,
                pattern: pattern.clone(),
                template: template.clone(),
                once: false,
            });
        }
        self.triggers.extend(pending);
    }

    /// 加入一次性觸發器
    pub fn add_once(&mut self, pattern: Pattern, template: impl Into<String>) -> u64 {
        let id = self.alloc_id();
        self.triggers.push(Trigger {
            id,
            pattern,
            template: template.into(),
            once: true,
        });
        id
    }

    /// 處理一行，返回所有匹配的觸發器及展開後的命令
    pub fn process(&self, cache: &PatternCache, line: &[u8]) -> Vec<TriggerMatch> {
        self.triggers
            .iter()
            .filter(|t| t.pattern.is_match(cache, line))
            .map(|t| {
                let command = t.pattern.expand(cache, line, &t.template);
                TriggerMatch {
                    id: t.id,
                    once: t.once,
                    command: String::from_utf8_lossy(&command).into_owned(),
                }
            })
            .collect()
    }

    /// 移除一次性觸發器；已被移除時返回 false
    pub fn consume(&mut self, id: u64) -> bool {
        match self.triggers.iter().position(|t| t.id == id && t.once) {
            Some(index) => {
                self.triggers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}
