//! 帶外事件 Handler
//!
//! 每個 Handler 擁有自己的有界信箱與背景 task。分派時不會等待：
//! 信箱滿了就視為 Handler 無回應，永久標記為失效並關閉信箱。

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::protocol::TelnetEvent;

/// 使用者 Handler 的信箱容量
pub const HANDLER_MAILBOX: usize = 100;

/// 內建 Handler 的信箱容量
pub const SYSTEM_MAILBOX: usize = 1024;

/// 帶外事件處理者
///
/// 由專屬 task 依序呼叫，應盡快返回，否則信箱會被塞滿而遭移除。
pub trait Handler: Send + 'static {
    fn handle(&mut self, event: TelnetEvent);
}

/// Handler 存活狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// 信箱溢位或 task 已結束，不會再收到任何事件
    Dead,
}

/// 單一 Handler 的信箱端
#[derive(Debug)]
struct HandlerRunner {
    name: String,
    mailbox: Option<mpsc::Sender<TelnetEvent>>,
    liveness: Liveness,
}

impl HandlerRunner {
    fn offer(&mut self, event: TelnetEvent) -> bool {
        let Some(mailbox) = &self.mailbox else {
            return false;
        };

        match mailbox.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Handler {} 無回應，已移除", self.name);
                self.kill();
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Handler {} 已結束", self.name);
                self.kill();
                false
            }
        }
    }

    fn kill(&mut self) {
        // 丟掉 Sender 即關閉信箱，task 處理完剩餘訊息後結束
        self.mailbox = None;
        self.liveness = Liveness::Dead;
    }
}

/// Handler 註冊表
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    runners: Mutex<Vec<HandlerRunner>>,
}

impl HandlerRegistry {
    /// 創建空的註冊表
    pub fn new() -> Self {
        Self::default()
    }

    /// 註冊 Handler 並啟動其 task（需在 tokio runtime 內呼叫）
    pub fn register<H: Handler>(&self, name: impl Into<String>, mut handler: H, capacity: usize) {
        let name = name.into();
        let (tx, mut rx) = mpsc::channel::<TelnetEvent>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler.handle(event);
            }
        });

        debug!("已註冊 Handler {}", name);
        self.runners.lock().push(HandlerRunner {
            name,
            mailbox: Some(tx),
            liveness: Liveness::Alive,
        });
    }

    /// 分派事件給所有存活的 Handler，返回成功投遞的數量
    pub fn dispatch(&self, event: &TelnetEvent) -> usize {
        let mut runners = self.runners.lock();
        runners
            .iter_mut()
            .filter(|r| r.liveness == Liveness::Alive)
            .map(|r| r.offer(event.clone()))
            .filter(|delivered| *delivered)
            .count()
    }

    /// 查詢指定 Handler 的狀態
    pub fn liveness(&self, name: &str) -> Option<Liveness> {
        self.runners
            .lock()
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.liveness)
    }

    /// 存活中的 Handler 數量
    pub fn alive(&self) -> usize {
        self.runners
            .lock()
            .iter()
            .filter(|r| r.liveness == Liveness::Alive)
            .count()
    }
}
