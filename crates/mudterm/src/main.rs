//! MUD Client 終端機前端
//!
//! 用法：`mudterm <session 目錄>`，目錄內需有 `config.json`。
//! 伺服器輸出寫到 stdout，stdin 每行視為一筆輸入，診斷日誌寫到 stderr。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use mudcore::{connect, Config, OutputSink, PatternCache, Session, TelnetConfig};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 設定檔檢查間隔
const CONFIG_POLL: Duration = Duration::from_secs(5);

const CONFIG_FILE: &str = "config.json";

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    // 初始化日誌（stdout 留給遊戲畫面）
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = Runtime::new()?;
    let result = runtime.block_on(run());
    // stdin 的讀取在 blocking 執行緒上，直接 drop runtime 會一直等到下一次按鍵
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    result
}

async fn run() -> Result<()> {
    let Some(dir) = std::env::args_os().nth(1).map(PathBuf::from) else {
        bail!("用法: mudterm <session 目錄>");
    };
    let config_path = dir.join(CONFIG_FILE);
    let cfg = load_config(&config_path)?;

    let telnet = TelnetConfig {
        prompt_marker: true,
        ..Default::default()
    };
    let conn = connect(&cfg.address, &telnet)
        .await
        .with_context(|| format!("無法連線到 {}", cfg.address))?;
    let (reader, writer) = conn.into_split();

    let patterns = Arc::new(PatternCache::new());
    let session = Arc::new(Session::new(&dir, writer, OutputSink::stdout(), patterns));
    session.set_config(cfg);

    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(watch_config(config_path, tx));
    let follower = session.clone();
    tokio::spawn(async move { follower.follow_config(rx).await });

    session.run(reader, tokio::io::stdin()).await?;
    info!("session 結束");
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("無法讀取 {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("無法解析 {}", path.display()))
}

async fn modified(path: &Path) -> std::io::Result<SystemTime> {
    tokio::fs::metadata(path).await?.modified()
}

/// 定期檢查設定檔的修改時間，有變更時解析並送出
async fn watch_config(path: PathBuf, updates: mpsc::Sender<Config>) {
    let mut mtime = modified(&path).await.ok();
    let mut ticker = tokio::time::interval(CONFIG_POLL);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let current = match modified(&path).await {
            Ok(current) => current,
            Err(e) => {
                warn!("無法讀取 {} 的狀態: {}", path.display(), e);
                continue;
            }
        };
        if mtime.is_some_and(|last| current <= last) {
            continue;
        }

        match load_config(&path) {
            Ok(cfg) => {
                mtime = Some(current);
                if updates.send(cfg).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("{:#}", e),
        }
    }
}
