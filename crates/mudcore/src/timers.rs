//! 週期命令
//!
//! 一組計時器共用一個 `CancellationToken`；重新載入設定時取消整組再啟動新的一組。

use std::time::Duration;

use bytes::Bytes;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::telnet::ConnWriter;

/// 已展開的計時器
#[derive(Debug, Clone)]
pub struct TimerJob {
    pub every: Duration,
    /// 已編碼的命令行，每次觸發依序送出
    pub lines: Vec<Bytes>,
}

/// 啟動一組計時器，返回取消整組用的 token
///
/// 第一次觸發在一個週期之後。間隔為零的計時器不啟動。需在 tokio runtime 內呼叫。
pub fn spawn_timers(jobs: Vec<TimerJob>, writer: ConnWriter) -> CancellationToken {
    let token = CancellationToken::new();

    for job in jobs {
        if job.every.is_zero() {
            warn!("計時器間隔為零，略過");
            continue;
        }

        let token = token.clone();
        let writer = writer.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + job.every, job.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for line in &job.lines {
                            if token.is_cancelled() || writer.send_line(line).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            debug!("計時器已停止");
        });
    }

    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_every_interval_until_cancelled() {
        let (writer, mut rx) = ConnWriter::channel();
        let token = spawn_timers(
            vec![TimerJob {
                every: Duration::from_secs(10),
                lines: vec![Bytes::from_static(b"save")],
            }],
            writer,
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(&rx.recv().await.unwrap()[..], b"save\r\n");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(&rx.recv().await.unwrap()[..], b"save\r\n");

        token.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_skipped() {
        let (writer, mut rx) = ConnWriter::channel();
        let _token = spawn_timers(
            vec![TimerJob {
                every: Duration::ZERO,
                lines: vec![Bytes::from_static(b"spam")],
            }],
            writer,
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }
}
