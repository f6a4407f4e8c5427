//! 命令歷史
//!
//! 固定大小的環形緩衝區，保存最近送出的命令

use std::collections::VecDeque;

/// 預設保留的命令數
pub const HISTORY_CAPACITY: usize = 100;

/// 命令歷史緩衝區
///
/// 當緩衝區滿了時，最舊的命令會被移除
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
}

impl History {
    /// # Example
    /// ```
    /// use mudcore::history::History;
    ///
    /// let history = History::new(100);
    /// assert_eq!(history.len(), 0);
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// 加入一筆命令，滿了就丟掉最舊的
    pub fn push(&mut self, command: impl Into<String>) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(command.into());
    }

    /// 由舊到新
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 以 `"; "` 串接，可直接重新輸入
    pub fn joined(&self) -> String {
        self.entries.iter().map(String::as_str).collect::<Vec<_>>().join("; ")
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_overflow() {
        let mut history = History::new(3);
        for cmd in ["1", "2", "3", "4"] {
            history.push(cmd);
        }

        assert_eq!(history.len(), 3);
        let entries: Vec<_> = history.iter().collect();
        assert_eq!(entries, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_default_keeps_last_hundred() {
        let mut history = History::default();
        for i in 0..150 {
            history.push(format!("cmd{}", i));
        }

        assert_eq!(history.len(), 100);
        assert_eq!(history.iter().next().map(String::as_str), Some("cmd50"));
        assert_eq!(history.iter().last().map(String::as_str), Some("cmd149"));
    }

    #[test]
    fn test_joined_and_clear() {
        let mut history = History::default();
        history.push("north");
        history.push("look");
        assert_eq!(history.joined(), "north; look");

        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.joined(), "");
    }
}
