//! 逐行讀取
//!
//! 以 `\n` 或 EOT（提示字元標記）為行尾，去掉結尾的 `\r`；串流結束時回傳剩餘的不完整行。
//! 單行超過 `MAX_LINE_LEN` 時強制切開。

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::telnet::{EOT, MAX_SUBNEGOTIATION_LEN};

const READ_CHUNK: usize = 4096;

/// 單行長度上限
pub const MAX_LINE_LEN: usize = MAX_SUBNEGOTIATION_LEN;

/// 非同步逐行讀取器
pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
    /// `buf` 中已確認沒有行尾的長度
    scanned: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            scanned: 0,
            eof: false,
        }
    }

    /// 讀取下一行，串流結束時返回 `None`
    pub async fn next_line(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            let found = self.buf[self.scanned..]
                .iter()
                .position(|&b| b == b'\n' || b == EOT);
            if let Some(offset) = found {
                let pos = self.scanned + offset;
                self.scanned = 0;
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                return Ok(Some(line.freeze()));
            }
            self.scanned = self.buf.len();

            if self.buf.len() >= MAX_LINE_LEN {
                warn!("單行超過 {} 位元組，強制切行", MAX_LINE_LEN);
                let line = self.buf.split_to(MAX_LINE_LEN);
                self.scanned = self.buf.len();
                return Ok(Some(line.freeze()));
            }

            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let mut line = self.buf.split();
                self.scanned = 0;
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(line.freeze()));
            }

            self.buf.reserve(READ_CHUNK);
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }
}
