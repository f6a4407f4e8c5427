//! Telnet 協定模組
//!
//! 實作 Telnet 連線管理、協定解析與帶外事件分派

mod client;
mod gmcp;
mod handler;
mod protocol;
mod reader;

pub use client::{connect, write_loop, ConnWriter, TelnetConfig, TelnetConnection, TelnetError};
pub use gmcp::{GmcpDecoder, GmcpMessage, NegotiationResponder, DEFAULT_GMCP_SUPPORTS};
pub use handler::{Handler, HandlerRegistry, Liveness, HANDLER_MAILBOX, SYSTEM_MAILBOX};
pub use protocol::{
    escape_iac, negotiation_reply, TelnetCommand, TelnetEvent, TelnetOption, TelnetParser, IAC,
    MAX_SUBNEGOTIATION_LEN,
};
pub use reader::{TelnetReader, EOT};
