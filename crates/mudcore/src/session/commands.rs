//! 客戶端命令的執行

use std::sync::Arc;
use std::time::Duration;

use super::{Session, SessionError};
use crate::command::{ClientCommand, CommandError, ListOp, MAX_WAIT};
use crate::dump::{ActiveDump, DumpError};

/// 距離下一次 tick 的時間
fn until_next_tick(elapsed: Duration, period: Duration) -> Duration {
    if period.is_zero() {
        return Duration::ZERO;
    }
    let into_period = elapsed.as_nanos() % period.as_nanos();
    period - Duration::from_nanos(into_period as u64)
}

impl Session {
    /// 執行一行 `/` 命令；錯誤都回報給使用者，只有寫入伺服器失敗會往上傳
    pub(super) async fn execute(&self, line: &str) -> Result<(), SessionError> {
        let command = match ClientCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                self.output.info(format!("[ERROR: {}]", e));
                return Ok(());
            }
        };

        match command {
            ClientCommand::Set(pairs) => {
                {
                    let mut state = self.state.write();
                    let vars = Arc::make_mut(&mut state.vars);
                    for (k, v) in &pairs {
                        vars.insert(k.clone(), v.clone());
                    }
                }
                for (k, v) in &pairs {
                    self.output.text(format!("{}={}", k, v));
                }
            }
            ClientCommand::Vars => {
                for (k, v) in self.vars().iter() {
                    self.output.text(format!("{}={}", k, v));
                }
            }
            ClientCommand::Aliases => {
                for (k, v) in &self.config().aliases {
                    self.output.text(format!("{}={}", k, v));
                }
            }
            ClientCommand::Tick => {
                let (last, period) = {
                    let state = self.state.read();
                    (state.last_tick, state.cfg.tick.duration)
                };
                match last {
                    Some(last) => {
                        let secs = until_next_tick(last.elapsed(), period).as_secs();
                        self.output.info(format!("next tick in {}s", secs));
                    }
                    None => self.output.info("no tick info"),
                }
            }
            ClientCommand::Wait(duration) => {
                tokio::time::sleep(duration.min(MAX_WAIT)).await;
            }
            ClientCommand::TriggersOn => self.state.write().triggers_disabled = false,
            ClientCommand::TriggersOff => self.state.write().triggers_disabled = true,
            ClientCommand::History => {
                let joined = self.state.read().history.joined();
                self.output.text(joined);
            }
            ClientCommand::ClearHistory => self.state.write().history.clear(),
            ClientCommand::Dump(name) => match self.start_dump(&name) {
                Ok((cmd, dest)) => {
                    self.output.info(format!("[dump: {} -> {}]", name, dest));
                    if !cmd.is_empty() {
                        self.send_text(&cmd)?;
                    }
                }
                Err(e) => self.output.info(format!("[ERROR: {}]", e)),
            },
            ClientCommand::On { pattern, action } => {
                if let Err(e) = self.patterns.get(pattern.as_str()) {
                    self.output.info(format!("[ERROR: {}]", e));
                    return Ok(());
                }
                self.state.write().triggers.add_once(pattern.clone(), action);
                self.output.info(format!("[on: {}]", pattern));
            }
            ClientCommand::List { name, op } => match self.list_op(&name, op) {
                Ok(lines) => {
                    for line in lines {
                        self.output.text(line);
                    }
                }
                Err(e) => self.output.info(format!("[ERROR: {}]", e)),
            },
            ClientCommand::Incr { var, amount } => match self.incr(&var, amount) {
                Ok(value) => self.output.text(format!("{}={}", var, value)),
                Err(e) => self.output.info(format!("[ERROR: {}]", e)),
            },
        }
        Ok(())
    }

    /// 開始擷取，返回要送出的命令與目的檔
    fn start_dump(&self, name: &str) -> Result<(String, String), DumpError> {
        let mut state = self.state.write();
        if let Some(active) = &state.dump {
            return Err(DumpError::Busy(active.name().to_string()));
        }
        let def = state
            .cfg
            .dump
            .get(name)
            .cloned()
            .ok_or_else(|| DumpError::Unknown(name.to_string()))?;

        let started = (def.cmd.clone(), def.dest.clone());
        state.dump = Some(Arc::new(ActiveDump::open(&self.dir, name, def)?));
        Ok(started)
    }

    fn list_op(&self, name: &str, op: ListOp) -> Result<Vec<String>, String> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        match op {
            ListOp::Get { index, var } => {
                let value = state
                    .lists
                    .get(name)
                    .and_then(|list| list.get(index))
                    .cloned()
                    .ok_or_else(|| format!("{}[{}] 不存在", name, index))?;
                Arc::make_mut(&mut state.vars).insert(var.clone(), value.clone());
                Ok(vec![format!("{}={}", var, value)])
            }
            ListOp::Push(value) => {
                state.lists.entry(name.to_string()).or_default().push(value);
                Ok(Vec::new())
            }
            ListOp::Pop(var) => {
                let value = state
                    .lists
                    .get_mut(name)
                    .and_then(Vec::pop)
                    .ok_or_else(|| format!("清單 {} 是空的", name))?;
                match var {
                    Some(var) => {
                        Arc::make_mut(&mut state.vars).insert(var.clone(), value.clone());
                        Ok(vec![format!("{}={}", var, value)])
                    }
                    None => Ok(vec![value]),
                }
            }
            ListOp::Print => {
                let list = state
                    .lists
                    .get(name)
                    .ok_or_else(|| format!("沒有名為 {} 的清單", name))?;
                Ok(list
                    .iter()
                    .enumerate()
                    .map(|(i, item)| format!("{}[{}] {}", name, i, item))
                    .collect())
            }
        }
    }

    fn incr(&self, var: &str, amount: i64) -> Result<i64, CommandError> {
        let mut state = self.state.write();
        let current = match state.vars.get(var) {
            Some(value) => value
                .trim()
                .parse::<i64>()
                .map_err(|_| CommandError::NotANumber(value.clone()))?,
            None => 0,
        };
        let next = current.saturating_add(amount);
        Arc::make_mut(&mut state.vars).insert(var.to_string(), next.to_string());
        Ok(next)
    }
}
