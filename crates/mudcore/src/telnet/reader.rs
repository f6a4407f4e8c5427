//! Telnet 讀取端
//!
//! 包裝原始連線，讀出的只有應用層位元組；協定序列在讀取時被解析並分派給 Handler。

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, ReadBuf};

use super::handler::HandlerRegistry;
use super::protocol::{TelnetEvent, TelnetParser};

/// End of Transmission，提示字元標記
pub const EOT: u8 = 0x04;

/// 解析 Telnet 協定後的讀取端
pub struct TelnetReader<R> {
    inner: R,
    parser: TelnetParser,
    handlers: Arc<HandlerRegistry>,
    raw: Box<[u8]>,
    pending: BytesMut,
    events: Vec<TelnetEvent>,
    prompt_marker: bool,
}

impl<R> TelnetReader<R> {
    /// 創建讀取端
    pub fn new(inner: R, handlers: Arc<HandlerRegistry>, buffer_size: usize) -> Self {
        Self {
            inner,
            parser: TelnetParser::new(),
            handlers,
            raw: vec![0u8; buffer_size.max(16)].into_boxed_slice(),
            pending: BytesMut::new(),
            events: Vec::new(),
            prompt_marker: false,
        }
    }

    /// 啟用提示字元啟發式
    ///
    /// 一次短讀取若沒有以換行結尾，通常代表伺服器停在提示字元等待輸入；
    /// 此時在資料尾端補一個 EOT，讓逐行讀取者可以把它當成完整一行。
    pub fn with_prompt_marker(mut self, enabled: bool) -> Self {
        self.prompt_marker = enabled;
        self
    }

    fn process(&mut self, n: usize) {
        let before = self.pending.len();
        self.parser.feed(&self.raw[..n], &mut self.pending, &mut self.events);

        for event in self.events.drain(..) {
            self.handlers.dispatch(&event);
        }

        let short_read = n < self.raw.len();
        if self.prompt_marker
            && short_read
            && self.pending.len() > before
            && self.pending.last() != Some(&b'\n')
        {
            self.pending.put_u8(EOT);
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TelnetReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }

            let mut raw = ReadBuf::new(&mut this.raw);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut raw))?;
            let n = raw.filled().len();
            if n == 0 {
                return Poll::Ready(Ok(()));
            }

            // 只有協定序列時 pending 仍為空，繼續讀下一段
            this.process(n);
        }
    }
}
