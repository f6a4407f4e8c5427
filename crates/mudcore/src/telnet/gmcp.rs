//! 內建的帶外 Handler
//!
//! - `NegotiationResponder`: 回應伺服器的選項協商，接受 GMCP 並送出 Hello
//! - `GmcpDecoder`: 將 GMCP sub-negotiation 拆成 module 與 data 後重新發佈

use bytes::Bytes;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::client::ConnWriter;
use super::handler::Handler;
use super::protocol::{negotiation_reply, TelnetCommand, TelnetEvent, TelnetOption};

/// 預設向伺服器宣告支援的 GMCP 模組
pub const DEFAULT_GMCP_SUPPORTS: &[&str] = &[
    "Char 1",
    "Char.Skills 1",
    "Char.Items 1",
    "Comm.Channel 1",
    "Room 1",
    "IRE.Rift 1",
];

/// 一則 GMCP 訊息
#[derive(Debug, Clone, PartialEq)]
pub struct GmcpMessage {
    /// 模組名稱，如 `Char.Vitals`
    pub module: String,
    /// 第一個空白之後的所有內容（通常是 JSON）
    pub data: Bytes,
}

impl GmcpMessage {
    /// 從 sub-negotiation 內容解析
    pub fn parse(payload: &Bytes) -> Self {
        match payload.iter().position(|&b| b == b' ') {
            Some(i) => Self {
                module: String::from_utf8_lossy(&payload[..i]).into_owned(),
                data: payload.slice(i + 1..),
            },
            None => Self {
                module: String::from_utf8_lossy(payload).into_owned(),
                data: Bytes::new(),
            },
        }
    }

    /// 以 JSON 解析 data，空內容視為 null
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.data.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&self.data)
    }
}

/// GMCP 入站解碼器
pub struct GmcpDecoder {
    tx: broadcast::Sender<GmcpMessage>,
}

impl GmcpDecoder {
    pub fn new(tx: broadcast::Sender<GmcpMessage>) -> Self {
        Self { tx }
    }
}

impl Handler for GmcpDecoder {
    fn handle(&mut self, event: TelnetEvent) {
        if let TelnetEvent::Subnegotiation(TelnetOption::Gmcp, payload) = event {
            let msg = GmcpMessage::parse(&payload);
            debug!("GMCP {} [len(data)=={}]", msg.module, msg.data.len());
            // 沒有訂閱者時送出失敗是正常的
            let _ = self.tx.send(msg);
        }
    }
}

/// 選項協商回應者
pub struct NegotiationResponder {
    writer: ConnWriter,
    client: String,
    version: String,
    supports: Vec<String>,
    said_hello: bool,
}

impl NegotiationResponder {
    pub fn new(
        writer: ConnWriter,
        client: impl Into<String>,
        version: impl Into<String>,
        supports: Vec<String>,
    ) -> Self {
        Self {
            writer,
            client: client.into(),
            version: version.into(),
            supports,
            said_hello: false,
        }
    }

    fn accept_gmcp(&mut self) {
        info!("IAC WILL GMCP，回應 DO GMCP");
        let _ = self.writer.send_command(TelnetCommand::Do, TelnetOption::Gmcp);
        if self.said_hello {
            return;
        }

        let hello = json!({ "client": self.client, "version": self.version });
        let supports = serde_json::Value::from(self.supports.clone());
        let _ = self.writer.send_gmcp(&format!("Core.Hello {}", hello));
        let _ = self.writer.send_gmcp(&format!("Core.Supports.Set {}", supports));
        self.said_hello = true;
    }
}

impl Handler for NegotiationResponder {
    fn handle(&mut self, event: TelnetEvent) {
        match event {
            TelnetEvent::Negotiate(TelnetCommand::Will, TelnetOption::Gmcp) => self.accept_gmcp(),
            TelnetEvent::Negotiate(cmd, option) => {
                if let Some(reply) = negotiation_reply(cmd, option) {
                    debug!("回應協商 {:?} {:?}", cmd, option);
                    let _ = self.writer.send_raw(Bytes::copy_from_slice(&reply));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telnet::protocol::IAC;

    #[test]
    fn test_parse_module_and_data() {
        let msg = GmcpMessage::parse(&Bytes::from_static(b"Char.Vitals {\"hp\": 10}"));
        assert_eq!(msg.module, "Char.Vitals");
        assert_eq!(&msg.data[..], b"{\"hp\": 10}");
        assert_eq!(msg.json().unwrap()["hp"], 10);
    }

    #[test]
    fn test_parse_module_only() {
        let msg = GmcpMessage::parse(&Bytes::from_static(b"Core.Ping"));
        assert_eq!(msg.module, "Core.Ping");
        assert!(msg.data.is_empty());
        assert_eq!(msg.json().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_decoder_republishes() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut decoder = GmcpDecoder::new(tx);

        decoder.handle(TelnetEvent::Subnegotiation(
            TelnetOption::Gmcp,
            Bytes::from_static(b"Room.Info {}"),
        ));
        decoder.handle(TelnetEvent::Subnegotiation(
            TelnetOption::Unknown(70),
            Bytes::from_static(b"ignored"),
        ));

        assert_eq!(rx.try_recv().unwrap().module, "Room.Info");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_responder_accepts_gmcp_once() {
        let (writer, mut rx) = ConnWriter::channel();
        let supports = DEFAULT_GMCP_SUPPORTS.iter().map(|s| s.to_string()).collect();
        let mut responder = NegotiationResponder::new(writer, "mudterm", "0.1.0", supports);

        responder.handle(TelnetEvent::Negotiate(TelnetCommand::Will, TelnetOption::Gmcp));
        assert_eq!(&rx.try_recv().unwrap()[..], &[IAC, TelnetCommand::Do as u8, 201]);

        let hello = rx.try_recv().unwrap();
        assert_eq!(&hello[..3], &[IAC, TelnetCommand::Sb as u8, 201]);
        assert!(String::from_utf8_lossy(&hello).contains("Core.Hello"));
        let supports = rx.try_recv().unwrap();
        assert!(String::from_utf8_lossy(&supports).contains("Core.Supports.Set"));

        // 第二次只回 DO，不重送 Hello
        responder.handle(TelnetEvent::Negotiate(TelnetCommand::Will, TelnetOption::Gmcp));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_responder_refuses_other_options() {
        let (writer, mut rx) = ConnWriter::channel();
        let mut responder = NegotiationResponder::new(writer, "mudterm", "0.1.0", Vec::new());

        responder.handle(TelnetEvent::Negotiate(TelnetCommand::Do, TelnetOption::Naws));
        assert_eq!(&rx.try_recv().unwrap()[..], &[IAC, TelnetCommand::Wont as u8, 31]);

        responder.handle(TelnetEvent::Negotiate(TelnetCommand::Dont, TelnetOption::Naws));
        assert!(rx.try_recv().is_err());
    }
}
