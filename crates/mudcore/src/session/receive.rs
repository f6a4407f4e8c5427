//! 接收流程
//!
//! 每一行分兩段處理：先在讀鎖下完成所有比對並收集結果，
//! 放開鎖之後才輸出、觸發命令、修改狀態。

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use super::send::Origin;
use super::{Session, SessionError};
use crate::config::Config;
use crate::dump::ActiveDump;
use crate::pattern::{highlight, PatternCache};
use crate::trigger::TriggerMatch;

/// tick 提醒提前量
const TICK_WARNING: Duration = Duration::from_secs(10);

/// 讀鎖下收集的處理結果
struct Processed {
    /// `None` 表示被 gag
    display: Option<Vec<u8>>,
    fired: Vec<TriggerMatch>,
    dump_done: Option<Arc<ActiveDump>>,
    tick: Option<Duration>,
}

impl Session {
    /// 處理伺服器送來的一行（不含行尾）
    pub async fn receive(&self, raw: &[u8]) -> Result<(), SessionError> {
        let processed = self.process_line(raw);

        if let Some(display) = &processed.display {
            self.output.line(display);
        }

        for fired in processed.fired {
            if fired.once && !self.state.write().triggers.consume(fired.id) {
                continue;
            }
            self.output.info(format!("[trigger: {}]", fired.command));
            self.submit(&fired.command, Origin::Trigger).await?;
        }

        if let Some(done) = processed.dump_done {
            let mut state = self.state.write();
            if state.dump.as_ref().is_some_and(|active| Arc::ptr_eq(active, &done)) {
                state.dump = None;
                debug!("擷取 {} 結束", done.name());
            }
        }

        if let Some(period) = processed.tick {
            self.state.write().last_tick = Some(Instant::now());
            let output = self.output.clone();
            tokio::spawn(async move {
                tokio::time::sleep(period.saturating_sub(TICK_WARNING)).await;
                output.alert("10s until next tick.");
            });
        }
        Ok(())
    }

    fn process_line(&self, raw: &[u8]) -> Processed {
        let state = self.state.read();
        let cfg = &state.cfg;
        let cache = &*self.patterns;
        let line = cfg.encoding.decode(raw);

        let dump_done = state
            .dump
            .as_ref()
            .filter(|dump| dump.feed(cache, &line))
            .cloned();

        let (text, display) = render(cache, cfg, &line);
        let gagged = cfg.gag.iter().any(|p| p.is_match(cache, &text));

        let fired = if state.triggers_disabled {
            Vec::new()
        } else {
            state.triggers.process(cache, &line)
        };

        if !cfg.log.is_empty() {
            let entry = (cfg.clone(), Bytes::copy_from_slice(&line));
            if self.log_tx.send(entry).is_err() {
                debug!("日誌 task 已結束");
            }
        }

        let tick = cfg
            .tick
            .markers
            .iter()
            .any(|marker| !marker.is_empty() && contains(&line, marker.as_bytes()))
            .then_some(cfg.tick.duration);

        Processed {
            display: (!gagged).then_some(display),
            fired,
            dump_done,
            tick,
        }
    }
}

/// 套用 replace，沒有任何 replace 時套用 highlight
///
/// 返回 (未上色的文字, 顯示用的文字)；gag 以前者判斷。
fn render(cache: &PatternCache, cfg: &Config, line: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut text = Cow::Borrowed(line);
    let mut replaced = false;
    let mut color = None;

    for (pattern, rule) in &cfg.replace {
        if pattern.is_match(cache, &text) {
            text = Cow::Owned(pattern.expand(cache, &text, &rule.with));
            color = rule.color;
            replaced = true;
        }
    }

    if replaced {
        let display = match color {
            Some(color) => color.paint(&text),
            None => text.to_vec(),
        };
        return (text.into_owned(), display);
    }

    if line.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let display = highlight(cache, &cfg.highlight, line).unwrap_or_else(|| line.to_vec());
    (line.to_vec(), display)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;

    #[tokio::test]
    async fn test_plain_line_passes_through() {
        let h = Harness::new("{}");
        h.session.receive(b"You see a rat.").await.unwrap();
        assert_eq!(h.output.contents(), b"You see a rat.\n".to_vec());
    }

    #[tokio::test]
    async fn test_gag_suppresses_output_but_not_triggers() {
        let mut h = Harness::new(r#"{"gag": ["^Spam"], "triggers": {"^Spam (\\w+)": "kill $1"}}"#);
        h.session.receive(b"Spam rat").await.unwrap();

        let lines = h.output.lines();
        assert!(!lines.contains(&"Spam rat".to_string()));
        assert_eq!(lines, vec!["[trigger: kill rat]", "kill rat"]);
        assert_eq!(h.sent_lines(), vec!["kill rat"]);
    }

    #[tokio::test]
    async fn test_replace_takes_precedence_over_highlight() {
        let h = Harness::new(
            r#"{"replace": {"^(\\w+) hits you": {"with": "OUCH from $1", "color": "red"}},
                "highlight": {"hits": "yellow"}}"#,
        );
        h.session.receive(b"Orc hits you hard").await.unwrap();
        assert_eq!(h.output.contents(), b"\x1b[91;1mOUCH from Orc\x1b[0m\n".to_vec());
    }

    #[tokio::test]
    async fn test_gag_checks_replaced_text() {
        let h = Harness::new(r#"{"replace": {"^noise": {"with": "HIDDEN"}}, "gag": ["^HIDDEN$"]}"#);
        h.session.receive(b"noise noise").await.unwrap();
        assert!(h.output.contents().is_empty());
    }

    #[tokio::test]
    async fn test_highlight() {
        let h = Harness::new(r#"{"highlight": {"gold": "yellow"}}"#);
        h.session.receive(b"a gold coin").await.unwrap();
        assert_eq!(h.output.contents(), b"a \x1b[93;1mgold\x1b[0m coin\n".to_vec());
    }

    #[tokio::test]
    async fn test_trigger_expands_every_match_and_aliases() {
        let mut h = Harness::new(
            r#"{"triggers": {"(\\w+) drops": "get $1;"}, "aliases": {"get": "take $1"}}"#,
        );
        h.session.receive(b"sword drops, shield drops").await.unwrap();
        assert_eq!(h.sent_lines(), vec!["take sword", "take shield", ""]);
    }

    #[tokio::test]
    async fn test_triggers_disabled() {
        let mut h = Harness::new(r#"{"triggers": {"hungry": "eat"}}"#);
        h.session.send("/triggers-off").await.unwrap();
        h.session.receive(b"You are hungry").await.unwrap();
        assert!(h.sent_lines().is_empty());

        h.session.send("/triggers-on").await.unwrap();
        h.session.receive(b"You are hungry").await.unwrap();
        assert_eq!(h.sent_lines(), vec!["eat"]);
    }

    #[tokio::test]
    async fn test_trigger_output_never_runs_shell() {
        let marker = tempfile::tempdir().unwrap();
        let path = marker.path().join("created");
        let mut h = Harness::new(r#"{"triggers": {"^You hear: (.*)$": "$1"}}"#);

        let line = format!("You hear: !touch {}", path.display());
        h.session.receive(line.as_bytes()).await.unwrap();

        assert!(!path.exists());
        assert_eq!(h.sent_lines(), vec![format!("!touch {}", path.display())]);
    }

    #[tokio::test]
    async fn test_one_time_trigger_fires_once() {
        let mut h = Harness::new("{}");
        h.session.send("/on foo bar").await.unwrap();
        h.output.clear();

        h.session.receive(b"foo").await.unwrap();
        h.session.receive(b"foo again").await.unwrap();

        assert_eq!(h.sent_lines(), vec!["bar"]);
        let lines = h.output.lines();
        assert_eq!(lines.iter().filter(|l| l.as_str() == "[trigger: bar]").count(), 1);
        assert!(lines.contains(&"foo again".to_string()));
    }

    #[tokio::test]
    async fn test_one_time_trigger_with_multiple_matches_on_line() {
        let mut h = Harness::new("{}");
        h.session.send("/on {(\\w+) waves} {wave $1}").await.unwrap();
        h.session.receive(b"Ann waves. Bob waves.").await.unwrap();
        // 一次觸發，模板對每個匹配展開後串接
        assert_eq!(h.sent_lines(), vec!["wave Annwave Bob"]);
    }

    #[tokio::test]
    async fn test_log_routes_raw_line() {
        let h = Harness::new(
            r#"{"gag": ["tells you"], "log": {"tells.log": {"match": {"tells you": "$0"}}}}"#,
        );
        h.session.receive(b"Bob tells you hi").await.unwrap();

        let path = h.dir.path().join("tells.log");
        for _ in 0..100 {
            if std::fs::read_to_string(&path).map(|c| c == "tells you\n").unwrap_or(false) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("log line not written");
    }

    #[tokio::test]
    async fn test_dump_capture_and_clear() {
        let mut h = Harness::new(
            r#"{"dump": {"score": {"cmd": "score", "dest": "score.txt", "start": "^Name", "end": "^--$"}}}"#,
        );
        h.session.send("/dump score").await.unwrap();
        assert_eq!(h.sent_lines(), vec!["score"]);
        assert_eq!(h.session.active_dump().as_deref(), Some("score"));

        for line in [&b"> "[..], b"Name: hero", b"Level: 3", b"--", b"after"] {
            h.session.receive(line).await.unwrap();
        }
        assert_eq!(h.session.active_dump(), None);

        let content = std::fs::read_to_string(h.dir.path().join("score.txt")).unwrap();
        assert_eq!(content, "Name: hero\nLevel: 3\n--\n");
    }

    #[tokio::test]
    async fn test_decode_charset() {
        let h = Harness::new(r#"{"encoding": "big5", "highlight": {"你好": "green"}}"#);
        h.session.receive(&[0xa7, 0x41, 0xa6, 0x6e]).await.unwrap();
        assert_eq!(h.output.lines(), vec!["你好"]);
        assert!(h.output.contents().starts_with(b"\x1b[32;1m"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_detection_and_alert() {
        let h = Harness::new(r#"{"tick": {"duration": "30s", "match": ["The sun rises"]}}"#);
        assert!(h.session.last_tick().is_none());

        h.session.receive(b"The sun rises in the east.").await.unwrap();
        assert!(h.session.last_tick().is_some());
        h.output.clear();

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(h.output.lines().is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.output.lines(), vec!["10s until next tick."]);
    }

    #[test]
    fn test_render_empty_line() {
        let cache = PatternCache::new();
        let cfg: Config = serde_json::from_str(r#"{"highlight": {".*": "red"}}"#).unwrap();
        let (text, display) = render(&cache, &cfg, b"");
        assert!(text.is_empty());
        assert!(display.is_empty());
    }
}
