//! 別名與變數展開
//!
//! 純函式：輸入一行命令與別名、變數表的快照，輸出展開後的命令列表。
//! 展開過程不持有任何鎖。

use indexmap::IndexMap;
use thiserror::Error;

use crate::config::Vars;

/// 命令分隔符
pub const SEPARATOR: char = ';';

/// 別名展開的最大深度
pub const MAX_EXPANSION_DEPTH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
    #[error("別名展開超過 {0} 層，可能有循環定義")]
    TooDeep(usize),
}

/// 展開結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// 依序送出的命令；空白子命令保留為空字串
    pub commands: Vec<String>,
    /// 過程中套用的別名內容，依套用順序
    pub aliases: Vec<String>,
}

/// 以 `;` 切分命令，`{...}` 內的分隔符不切
///
/// 不平衡的大括號不在這裡報錯，由命令解析處理。
pub fn split_commands(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            SEPARATOR if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// 別名與變數展開器
#[derive(Debug, Clone, Copy)]
pub struct Expander<'a> {
    aliases: &'a IndexMap<String, String>,
    vars: &'a Vars,
}

impl<'a> Expander<'a> {
    pub fn new(aliases: &'a IndexMap<String, String>, vars: &'a Vars) -> Self {
        Self { aliases, vars }
    }

    /// 展開一行輸入
    ///
    /// # Example
    /// ```
    /// use indexmap::IndexMap;
    /// use mudcore::expand::Expander;
    ///
    /// let mut aliases = IndexMap::new();
    /// aliases.insert("g".to_string(), "north;south".to_string());
    /// let vars = IndexMap::new();
    ///
    /// let out = Expander::new(&aliases, &vars).expand("g").unwrap();
    /// assert_eq!(out.commands, vec!["north", "south"]);
    /// ```
    pub fn expand(&self, input: &str) -> Result<Expansion, ExpandError> {
        let mut out = Expansion::default();
        self.expand_into(input, 0, &mut out)?;
        Ok(out)
    }

    fn expand_into(
        &self,
        input: &str,
        depth: usize,
        out: &mut Expansion,
    ) -> Result<(), ExpandError> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(ExpandError::TooDeep(MAX_EXPANSION_DEPTH));
        }

        for sub in split_commands(input) {
            let sub = sub.trim();
            if sub.is_empty() {
                out.commands.push(String::new());
                continue;
            }

            let words: Vec<&str> = sub.split_whitespace().collect();
            let (body, positional) = match self.aliases.get(words[0]) {
                Some(expansion) => {
                    out.aliases.push(expansion.clone());
                    (expansion.as_str(), Some(words.as_slice()))
                }
                None => (sub, None),
            };

            let expanded = interpolate(body, self.vars, positional);
            if split_commands(&expanded).len() > 1 {
                self.expand_into(&expanded, depth + 1, out)?;
            } else {
                out.commands.push(expanded);
            }
        }
        Ok(())
    }
}

/// 代入變數
///
/// - `$$` 為字面的 `$`
/// - `$name`、`${name}` 代入變數值；未定義時保留原文
/// - `$1`..`$N` 與 `$*` 只在有 `words`（別名的原始字詞）時代入，超出範圍為空字串
pub fn interpolate(template: &str, vars: &Vars, words: Option<&[&str]>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(stripped) = after.strip_prefix('$') {
            out.push('$');
            rest = stripped;
            continue;
        }

        let (name, consumed) = if let Some(inner) = after.strip_prefix('{') {
            match inner.find('}') {
                Some(end) => (&inner[..end], end + 2),
                None => ("", 0),
            }
        } else if after.starts_with('*') {
            ("*", 1)
        } else if after.starts_with(|c: char| c.is_ascii_digit()) {
            let len = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
            (&after[..len], len)
        } else {
            let len = after
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..len], len)
        };

        let raw = &rest[pos..pos + 1 + consumed];
        rest = &after[consumed..];

        if name.is_empty() {
            out.push_str(raw);
            continue;
        }

        match resolve(name, vars, words) {
            Some(value) => out.push_str(&value),
            None => out.push_str(raw),
        }
    }
    out.push_str(rest);
    out
}

fn resolve(name: &str, vars: &Vars, words: Option<&[&str]>) -> Option<String> {
    if name == "*" {
        return words.map(|w| w.get(1..).unwrap_or_default().join(" "));
    }
    if name.bytes().all(|b| b.is_ascii_digit()) {
        let words = words?;
        let index: usize = name.parse().ok()?;
        return Some(words.get(index).map(|w| w.to_string()).unwrap_or_default());
    }
    vars.get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn expand(aliases: &IndexMap<String, String>, vars: &Vars, input: &str) -> Vec<String> {
        Expander::new(aliases, vars).expand(input).unwrap().commands
    }

    #[test]
    fn test_plain_command() {
        let (a, v) = (aliases(&[]), Vars::new());
        assert_eq!(expand(&a, &v, "look"), vec!["look"]);
        assert_eq!(expand(&a, &v, "go;go"), vec!["go", "go"]);
    }

    #[test]
    fn test_alias_with_separator() {
        let a = aliases(&[("g", "north;south")]);
        let out = Expander::new(&a, &Vars::new()).expand("g").unwrap();
        assert_eq!(out.commands, vec!["north", "south"]);
        assert_eq!(out.aliases, vec!["north;south"]);
    }

    #[test]
    fn test_nested_aliases() {
        let a = aliases(&[("trip", "g;e"), ("g", "north;south"), ("e", "east")]);
        assert_eq!(expand(&a, &Vars::new(), "trip"), vec!["north", "south", "east"]);
    }

    #[test]
    fn test_blank_subcommands_kept() {
        let (a, v) = (aliases(&[]), Vars::new());
        assert_eq!(expand(&a, &v, "n;;s"), vec!["n", "", "s"]);
        assert_eq!(expand(&a, &v, ""), vec![""]);
    }

    #[test]
    fn test_undefined_variable_is_literal() {
        let (a, v) = (aliases(&[]), Vars::new());
        assert_eq!(expand(&a, &v, "$undefined"), vec!["$undefined"]);
        assert_eq!(expand(&a, &v, "say ${nope}!"), vec!["say ${nope}!"]);
    }

    #[test]
    fn test_variables() {
        let a = aliases(&[]);
        let mut v = Vars::new();
        v.insert("target".into(), "orc".into());
        assert_eq!(expand(&a, &v, "kill $target"), vec!["kill orc"]);
        assert_eq!(expand(&a, &v, "kill ${target}s"), vec!["kill orcs"]);
        assert_eq!(expand(&a, &v, "pay $$5"), vec!["pay $5"]);
    }

    #[test]
    fn test_positional_parameters() {
        let a = aliases(&[("k", "kill $1;say $*"), ("x", "get $3")]);
        let v = Vars::new();
        assert_eq!(expand(&a, &v, "k orc big"), vec!["kill orc", "say orc big"]);
        // 超出範圍為空字串
        assert_eq!(expand(&a, &v, "x coin"), vec!["get "]);
    }

    #[test]
    fn test_positional_without_alias_is_literal() {
        let (a, v) = (aliases(&[]), Vars::new());
        assert_eq!(expand(&a, &v, "echo $1 $*"), vec!["echo $1 $*"]);
    }

    #[test]
    fn test_braces_protect_separator() {
        let (a, v) = (aliases(&[]), Vars::new());
        assert_eq!(expand(&a, &v, "/on {foo} {a;b};look"), vec!["/on {foo} {a;b}", "look"]);
    }

    #[test]
    fn test_recursive_alias_is_bounded() {
        let a = aliases(&[("loop", "loop;loop")]);
        let err = Expander::new(&a, &Vars::new()).expand("loop").unwrap_err();
        assert_eq!(err, ExpandError::TooDeep(MAX_EXPANSION_DEPTH));
    }

    #[test]
    fn test_self_alias_without_separator_stops() {
        let a = aliases(&[("l", "l")]);
        assert_eq!(expand(&a, &Vars::new(), "l"), vec!["l"]);
    }
}
