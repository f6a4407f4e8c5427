//! 送出流程
//!
//! 輸入先經別名與變數展開，再逐一分派：`/` 為客戶端命令，`!` 為本地 shell，
//! `@` 開頭的命令送出但不回顯，其餘直接送往伺服器。

use tokio::process::Command;
use tracing::debug;

use super::{Session, SessionError};
use crate::expand::Expander;

/// 命令的來源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Origin {
    User,
    Trigger,
}

impl Session {
    /// 處理一行使用者輸入
    ///
    /// `!` 開頭的整行交給 shell，不做展開（shell 有自己的分號語法）。
    pub async fn send(&self, input: &str) -> Result<(), SessionError> {
        if input.starts_with('!') {
            return self.dispatch(input, Origin::User).await;
        }
        self.submit(input, Origin::User).await
    }

    /// 展開後依序分派
    pub(super) async fn submit(&self, input: &str, origin: Origin) -> Result<(), SessionError> {
        // 只在複製快照時持鎖
        let (cfg, vars) = {
            let state = self.state.read();
            (state.cfg.clone(), state.vars.clone())
        };

        let expansion = match Expander::new(&cfg.aliases, &vars).expand(input) {
            Ok(expansion) => expansion,
            Err(e) => {
                self.output.info(format!("[ERROR: {}]", e));
                return Ok(());
            }
        };

        for alias in &expansion.aliases {
            self.output.info(format!("[alias: {}]", alias));
        }
        for command in &expansion.commands {
            self.dispatch(command, origin).await?;
        }
        Ok(())
    }

    /// 分派單一命令
    ///
    /// 本地 shell 只接受使用者輸入；觸發器產生的 `!` 開頭命令當成一般文字送往伺服器。
    async fn dispatch(&self, command: &str, origin: Origin) -> Result<(), SessionError> {
        let shell = command.strip_prefix('!').filter(|_| origin == Origin::User);
        if let Some(shell) = shell {
            self.output.text(command);
            self.shell(shell).await;
            // 讓伺服器重送提示字元
            return self.send_text("");
        }

        if command.starts_with('/') {
            self.output.text(command);
            return self.execute(command).await;
        }

        let (text, echo) = match command.strip_prefix('@') {
            Some(quiet) => (quiet, false),
            None => (command, true),
        };
        self.send_text(text)?;
        if echo {
            self.output.text(text);
        }
        // `@` 多用於密碼，不留歷史
        if echo && origin == Origin::User && !text.is_empty() {
            self.state.write().history.push(text);
        }
        Ok(())
    }

    /// 以目前的字元編碼送出一行
    pub(super) fn send_text(&self, text: &str) -> Result<(), SessionError> {
        let charset = self.state.read().cfg.encoding;
        self.conn.send_line(&charset.encode(text.as_bytes()))?;
        Ok(())
    }

    async fn shell(&self, command: &str) {
        let args = match shell_words::split(command) {
            Ok(args) => args,
            Err(e) => {
                self.output.info(format!("[ERROR: {}]", e));
                return;
            }
        };
        let Some((program, rest)) = args.split_first() else {
            return;
        };

        debug!("執行本地命令: {:?}", args);
        match Command::new(program).args(rest).output().await {
            Ok(out) => {
                self.output.write_raw(&out.stdout);
                self.output.write_raw(&out.stderr);
                if !out.status.success() {
                    self.output.info(format!("[ERROR: {}: {}]", program, out.status));
                }
            }
            Err(e) => self.output.info(format!("[ERROR: {}: {}]", program, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;

    #[tokio::test]
    async fn test_plain_command_sent_echoed_and_recorded() {
        let mut h = Harness::new("{}");
        h.session.send("look").await.unwrap();

        assert_eq!(h.sent_lines(), vec!["look"]);
        assert_eq!(h.output.lines(), vec!["look"]);
        assert_eq!(h.session.history(), vec!["look"]);
    }

    #[tokio::test]
    async fn test_alias_expansion_notice_and_order() {
        let mut h = Harness::new(r#"{"aliases": {"g": "north;south"}}"#);
        h.session.send("g;look").await.unwrap();

        assert_eq!(h.sent_lines(), vec!["north", "south", "look"]);
        assert_eq!(h.output.lines()[0], "[alias: north;south]");
        assert_eq!(h.session.history(), vec!["north", "south", "look"]);
    }

    #[tokio::test]
    async fn test_blank_subcommand_sends_newline() {
        let mut h = Harness::new("{}");
        h.session.send("n;;s").await.unwrap();
        assert_eq!(h.sent_lines(), vec!["n", "", "s"]);
        assert_eq!(h.session.history(), vec!["n", "s"]);
    }

    #[tokio::test]
    async fn test_quiet_prefix_suppresses_echo() {
        let mut h = Harness::new("{}");
        h.session.send("@password123").await.unwrap();
        assert_eq!(h.sent_lines(), vec!["password123"]);
        assert!(h.output.lines().is_empty());
        assert!(h.session.history().is_empty());

        h.session.send("/history").await.unwrap();
        assert!(!h.output.contents().windows(11).any(|w| w == b"password123"));
    }

    #[tokio::test]
    async fn test_variables_interpolated() {
        let mut h = Harness::new(r#"{"vars": {"target": "orc"}}"#);
        h.session.send("kill $target;say $nobody").await.unwrap();
        assert_eq!(h.sent_lines(), vec!["kill orc", "say $nobody"]);
    }

    #[tokio::test]
    async fn test_history_bounded() {
        let mut h = Harness::new("{}");
        for i in 0..150 {
            h.session.send(&format!("cmd{}", i)).await.unwrap();
        }
        let history = h.session.history();
        assert_eq!(history.len(), 100);
        assert_eq!(history[0], "cmd50");
        assert_eq!(history[99], "cmd149");
        assert_eq!(h.sent_lines().len(), 150);
    }

    #[tokio::test]
    async fn test_recursive_alias_reported() {
        let mut h = Harness::new(r#"{"aliases": {"loop": "loop;loop"}}"#);
        h.session.send("loop").await.unwrap();
        assert!(h.sent_lines().is_empty());
        assert!(h.output.lines().iter().any(|l| l.starts_with("[ERROR: ")));
    }

    #[tokio::test]
    async fn test_shell_command_output_to_sink() {
        let mut h = Harness::new("{}");
        h.session.send("!echo hello; there").await.unwrap();

        let lines = h.output.lines();
        assert_eq!(lines[0], "!echo hello; there");
        assert_eq!(lines[1], "hello; there");
        // 只送出換行取得新的提示字元
        assert_eq!(h.sent_lines(), vec![""]);
        assert!(h.session.history().is_empty());
    }

    #[tokio::test]
    async fn test_shell_unbalanced_quote_reported() {
        let h = Harness::new("{}");
        h.session.send("!echo 'oops").await.unwrap();
        assert!(h.output.lines().iter().any(|l| l.starts_with("[ERROR: ")));
    }

    #[tokio::test]
    async fn test_send_after_connection_closed() {
        let mut h = Harness::new("{}");
        h.sent.close();
        assert!(h.session.send("look").await.is_err());
    }
}
