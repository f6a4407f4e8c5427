//! Telnet 客戶端
//!
//! 非同步 Telnet 連線管理：建立連線、寫入 task、內建 Handler 的註冊。

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::gmcp::{GmcpDecoder, GmcpMessage, NegotiationResponder, DEFAULT_GMCP_SUPPORTS};
use super::handler::{Handler, HandlerRegistry, HANDLER_MAILBOX, SYSTEM_MAILBOX};
use super::protocol::{escape_iac, TelnetCommand, TelnetOption, IAC};
use super::reader::TelnetReader;

/// Telnet 客戶端錯誤
#[derive(Debug, Error)]
pub enum TelnetError {
    #[error("連線失敗: {0}")]
    ConnectionFailed(#[from] io::Error),

    #[error("連線逾時")]
    Timeout,

    #[error("連線已關閉")]
    Closed,

    #[error("DNS 解析失敗: {0}")]
    DnsResolutionFailed(String),
}

/// Telnet 客戶端配置
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    /// 連線逾時
    pub connect_timeout: Duration,
    /// 讀取緩衝區大小
    pub read_buffer_size: usize,
    /// 短讀取且未以換行結尾時補上 EOT（0x04），讓逐行讀取者把提示字元當成完整一行
    pub prompt_marker: bool,
    /// GMCP Core.Hello 中的客戶端名稱
    pub client_name: String,
    /// GMCP Core.Hello 中的版本
    pub client_version: String,
    /// GMCP Core.Supports.Set 宣告的模組
    pub gmcp_supports: Vec<String>,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_buffer_size: 1024,
            prompt_marker: false,
            client_name: "mudterm".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            gmcp_supports: DEFAULT_GMCP_SUPPORTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// 寫入失敗的原因，所有 `ConnWriter` 共用
type Failure = Arc<watch::Sender<Option<Arc<io::Error>>>>;

/// 連線的寫入端
///
/// 所有寫入都經由單一 channel 交給寫入 task，可自由複製到多個 task 使用。
#[derive(Debug, Clone)]
pub struct ConnWriter {
    tx: mpsc::UnboundedSender<Bytes>,
    failure: Failure,
}

impl ConnWriter {
    /// 建立寫入端以及對應的接收端（由寫入 task 或測試消費）
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failure, _) = watch::channel(None);
        let writer = Self {
            tx,
            failure: Arc::new(failure),
        };
        (writer, rx)
    }

    /// 記錄寫入 task 的失敗，喚醒所有等待 `failed` 的呼叫者
    pub fn fail(&self, error: io::Error) {
        self.failure.send_replace(Some(Arc::new(error)));
    }

    /// 已記錄的寫入失敗
    pub fn failure(&self) -> Option<io::Error> {
        let failure = self.failure.borrow().clone();
        failure.map(|e| io::Error::new(e.kind(), e))
    }

    /// 等到寫入 task 失敗，返回失敗原因；未失敗前不會完成
    pub async fn failed(&self) -> io::Error {
        let mut rx = self.failure.subscribe();
        let failure = match rx.wait_for(Option::is_some).await {
            Ok(failure) => failure.clone(),
            Err(_) => None,
        };
        match failure {
            Some(e) => io::Error::new(e.kind(), e),
            None => std::future::pending().await,
        }
    }

    /// 發送原始位元組
    pub fn send_raw(&self, data: Bytes) -> Result<(), TelnetError> {
        self.tx.send(data).map_err(|_| TelnetError::Closed)
    }

    /// 發送一行應用層資料（轉義 IAC 並加上 CRLF）
    pub fn send_line(&self, line: &[u8]) -> Result<(), TelnetError> {
        let mut buf = BytesMut::with_capacity(line.len() + 2);
        escape_iac(line, &mut buf);
        buf.put_slice(b"\r\n");
        self.send_raw(buf.freeze())
    }

    /// 發送協商命令，如 `IAC DO GMCP`
    pub fn send_command(
        &self,
        cmd: TelnetCommand,
        option: TelnetOption,
    ) -> Result<(), TelnetError> {
        self.send_raw(Bytes::copy_from_slice(&[IAC, cmd as u8, option.as_byte()]))
    }

    /// 發送 sub-negotiation
    pub fn send_subnegotiation(
        &self,
        option: TelnetOption,
        payload: &[u8],
    ) -> Result<(), TelnetError> {
        let mut buf = BytesMut::with_capacity(payload.len() + 5);
        buf.put_slice(&[IAC, TelnetCommand::Sb as u8, option.as_byte()]);
        escape_iac(payload, &mut buf);
        buf.put_slice(&[IAC, TelnetCommand::Se as u8]);
        self.send_raw(buf.freeze())
    }

    /// 發送 GMCP 訊息
    pub fn send_gmcp(&self, message: &str) -> Result<(), TelnetError> {
        self.send_subnegotiation(TelnetOption::Gmcp, message.as_bytes())
    }

    /// 寫入 task 是否已結束
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 寫入迴圈：依序寫出 channel 中的資料直到發送端全部關閉或寫入失敗
pub async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Bytes>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = rx.recv().await {
        writer.write_all(&chunk).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// 一條 Telnet 連線
pub struct TelnetConnection<R> {
    reader: TelnetReader<R>,
    writer: ConnWriter,
    handlers: Arc<HandlerRegistry>,
    gmcp: broadcast::Sender<GmcpMessage>,
}

impl<R: AsyncRead + Unpin> TelnetConnection<R> {
    /// 從讀寫兩端組裝連線，啟動寫入 task 並註冊內建 Handler
    ///
    /// 需在 tokio runtime 內呼叫。
    pub fn new<W>(reader: R, writer: W, config: &TelnetConfig) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (conn_writer, rx) = ConnWriter::channel();
        // 寫入 task 不持有 ConnWriter，否則 channel 永遠不會關閉
        let failure = conn_writer.failure.clone();
        tokio::spawn(async move {
            if let Err(e) = write_loop(writer, rx).await {
                error!("寫入錯誤: {}", e);
                failure.send_replace(Some(Arc::new(e)));
            }
        });

        let handlers = Arc::new(HandlerRegistry::new());
        let (gmcp, _) = broadcast::channel(64);
        handlers.register("gmcp-inbound", GmcpDecoder::new(gmcp.clone()), SYSTEM_MAILBOX);
        handlers.register(
            "negotiation",
            NegotiationResponder::new(
                conn_writer.clone(),
                config.client_name.clone(),
                config.client_version.clone(),
                config.gmcp_supports.clone(),
            ),
            SYSTEM_MAILBOX,
        );

        let reader = TelnetReader::new(reader, handlers.clone(), config.read_buffer_size)
            .with_prompt_marker(config.prompt_marker);

        Self {
            reader,
            writer: conn_writer,
            handlers,
            gmcp,
        }
    }

    /// 註冊自訂帶外 Handler
    pub fn add_handler<H: Handler>(&self, name: impl Into<String>, handler: H) {
        self.handlers.register(name, handler, HANDLER_MAILBOX);
    }

    /// 訂閱解碼後的 GMCP 訊息
    pub fn subscribe_gmcp(&self) -> broadcast::Receiver<GmcpMessage> {
        self.gmcp.subscribe()
    }

    /// 取得寫入端
    pub fn writer(&self) -> ConnWriter {
        self.writer.clone()
    }

    /// Handler 註冊表
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// 拆成讀取端與寫入端
    pub fn into_split(self) -> (TelnetReader<R>, ConnWriter) {
        (self.reader, self.writer)
    }
}

/// 連線到 MUD 伺服器
///
/// # Arguments
/// * `address` - `host:port`
/// * `config` - 連線設定
pub async fn connect(
    address: &str,
    config: &TelnetConfig,
) -> Result<TelnetConnection<OwnedReadHalf>, TelnetError> {
    info!("正在連線到 {}", address);

    let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host(address)
        .await
        .map_err(|e| TelnetError::DnsResolutionFailed(e.to_string()))?
        .collect();

    let Some(addr) = socket_addrs.first() else {
        return Err(TelnetError::DnsResolutionFailed(format!("無法解析主機: {}", address)));
    };
    debug!("已解析到位址: {:?}", socket_addrs);

    let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TelnetError::Timeout)?
        .map_err(TelnetError::ConnectionFailed)?;

    stream.set_nodelay(true)?;
    info!("已連線到 {}", address);

    let (read_half, write_half) = stream.into_split();
    Ok(TelnetConnection::new(read_half, write_half, config))
}
