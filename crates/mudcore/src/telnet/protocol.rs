//! Telnet 協定常數和解析
//!
//! 實作 RFC 854 Telnet 協定的命令與一個可跨讀取邊界續接的解析狀態機。

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

/// Telnet IAC (Interpret As Command) - 0xFF
pub const IAC: u8 = 255;

/// 單一 sub-negotiation 的最大長度，超過即整段丟棄
pub const MAX_SUBNEGOTIATION_LEN: usize = 64 * 1024;

/// Telnet 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    /// Sub-negotiation End
    Se = 240,
    /// No Operation
    Nop = 241,
    /// Data Mark
    DataMark = 242,
    /// Break
    Break = 243,
    /// Interrupt Process
    InterruptProcess = 244,
    /// Abort Output
    AbortOutput = 245,
    /// Are You There
    AreYouThere = 246,
    /// Erase Character
    EraseCharacter = 247,
    /// Erase Line
    EraseLine = 248,
    /// Go Ahead
    GoAhead = 249,
    /// Sub-negotiation Begin
    Sb = 250,
    /// Will
    Will = 251,
    /// Won't
    Wont = 252,
    /// Do
    Do = 253,
    /// Don't
    Dont = 254,
}

impl TelnetCommand {
    /// 從位元組解析 Telnet 命令
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            240 => Some(Self::Se),
            241 => Some(Self::Nop),
            242 => Some(Self::DataMark),
            243 => Some(Self::Break),
            244 => Some(Self::InterruptProcess),
            245 => Some(Self::AbortOutput),
            246 => Some(Self::AreYouThere),
            247 => Some(Self::EraseCharacter),
            248 => Some(Self::EraseLine),
            249 => Some(Self::GoAhead),
            250 => Some(Self::Sb),
            251 => Some(Self::Will),
            252 => Some(Self::Wont),
            253 => Some(Self::Do),
            254 => Some(Self::Dont),
            _ => None,
        }
    }

    /// 是否為需要再帶一個選項位元組的協商動詞
    pub fn is_negotiation(&self) -> bool {
        matches!(self, Self::Will | Self::Wont | Self::Do | Self::Dont)
    }
}

/// Telnet 選項
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetOption {
    /// Binary Transmission
    BinaryTransmission,
    /// Echo
    Echo,
    /// Suppress Go Ahead
    SuppressGoAhead,
    /// Terminal Type
    TerminalType,
    /// Window Size (NAWS)
    Naws,
    /// Linemode
    Linemode,
    /// Environment Variables (New)
    NewEnviron,
    /// Charset
    Charset,
    /// MCCP2 (MUD Client Compression Protocol)
    Mccp2,
    /// GMCP (Generic MUD Communication Protocol)
    Gmcp,
    /// 未知選項
    Unknown(u8),
}

impl TelnetOption {
    /// 從位元組解析 Telnet 選項
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::BinaryTransmission,
            1 => Self::Echo,
            3 => Self::SuppressGoAhead,
            24 => Self::TerminalType,
            31 => Self::Naws,
            34 => Self::Linemode,
            39 => Self::NewEnviron,
            42 => Self::Charset,
            86 => Self::Mccp2,
            201 => Self::Gmcp,
            other => Self::Unknown(other),
        }
    }

    /// 獲取選項的位元組值
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::BinaryTransmission => 0,
            Self::Echo => 1,
            Self::SuppressGoAhead => 3,
            Self::TerminalType => 24,
            Self::Naws => 31,
            Self::Linemode => 34,
            Self::NewEnviron => 39,
            Self::Charset => 42,
            Self::Mccp2 => 86,
            Self::Gmcp => 201,
            Self::Unknown(b) => *b,
        }
    }
}

/// 帶外（out-of-band）事件，會被分派給已註冊的 Handler
#[derive(Debug, Clone, PartialEq)]
pub enum TelnetEvent {
    /// 無參數命令（GA、NOP 等）
    Command(TelnetCommand),
    /// 協商命令（WILL / WONT / DO / DONT + 選項）
    Negotiate(TelnetCommand, TelnetOption),
    /// Sub-negotiation 內容（不含選項位元組，IAC IAC 已還原）
    Subnegotiation(TelnetOption, Bytes),
}

/// 解析器狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiation(TelnetCommand),
    Subnegotiation,
    SubnegotiationIac,
}

/// Telnet 串流解析器
///
/// 狀態保存在結構內，任意切割輸入都會得到相同結果。
#[derive(Debug, Default)]
pub struct TelnetParser {
    state: State,
    subneg: BytesMut,
    overflowed: bool,
}

impl TelnetParser {
    /// 創建新的解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 餵入一段原始位元組
    ///
    /// 應用層資料追加到 `data`，帶外事件依序追加到 `events`。
    /// 格式錯誤的序列一律吞掉，不會回報錯誤。
    pub fn feed(&mut self, input: &[u8], data: &mut BytesMut, events: &mut Vec<TelnetEvent>) {
        for &byte in input {
            let state = self.state;
            self.state = match state {
                State::Data => {
                    if byte == IAC {
                        State::Iac
                    } else {
                        data.put_u8(byte);
                        State::Data
                    }
                }
                State::Iac => self.after_iac(byte, data, events),
                State::Negotiation(cmd) => {
                    events.push(TelnetEvent::Negotiate(cmd, TelnetOption::from_byte(byte)));
                    State::Data
                }
                State::Subnegotiation => {
                    if byte == IAC {
                        State::SubnegotiationIac
                    } else {
                        self.push_subneg(byte);
                        State::Subnegotiation
                    }
                }
                State::SubnegotiationIac => {
                    if byte == IAC {
                        self.push_subneg(IAC);
                        State::Subnegotiation
                    } else if byte == TelnetCommand::Se as u8 {
                        self.finish_subneg(events);
                        State::Data
                    } else {
                        debug!("sub-negotiation 內出現非預期命令 {}，忽略", byte);
                        State::Subnegotiation
                    }
                }
            };
        }
    }

    fn after_iac(&mut self, byte: u8, data: &mut BytesMut, events: &mut Vec<TelnetEvent>) -> State {
        if byte == IAC {
            data.put_u8(IAC);
            return State::Data;
        }

        match TelnetCommand::from_byte(byte) {
            Some(cmd) if cmd.is_negotiation() => State::Negotiation(cmd),
            Some(TelnetCommand::Sb) => {
                self.subneg.clear();
                self.overflowed = false;
                State::Subnegotiation
            }
            Some(cmd) => {
                events.push(TelnetEvent::Command(cmd));
                State::Data
            }
            None => {
                debug!("未知的 Telnet 命令 {}，忽略", byte);
                State::Data
            }
        }
    }

    fn push_subneg(&mut self, byte: u8) {
        if self.overflowed {
            return;
        }
        if self.subneg.len() >= MAX_SUBNEGOTIATION_LEN {
            warn!("sub-negotiation 超過 {} 位元組，丟棄", MAX_SUBNEGOTIATION_LEN);
            self.subneg.clear();
            self.overflowed = true;
            return;
        }
        self.subneg.put_u8(byte);
    }

    fn finish_subneg(&mut self, events: &mut Vec<TelnetEvent>) {
        if self.overflowed || self.subneg.is_empty() {
            self.subneg.clear();
            self.overflowed = false;
            return;
        }

        let mut buf = self.subneg.split();
        let payload = buf.split_off(1).freeze();
        events.push(TelnetEvent::Subnegotiation(TelnetOption::from_byte(buf[0]), payload));
    }
}

/// 產生協商回應
///
/// ECHO 與 SGA 接受，其他選項一律拒絕；WONT / DONT 不需回應。
/// GMCP 由專用的 handler 處理，不經過這裡。
pub fn negotiation_reply(cmd: TelnetCommand, option: TelnetOption) -> Option<[u8; 3]> {
    let reply = match (cmd, option) {
        (TelnetCommand::Will, TelnetOption::Echo | TelnetOption::SuppressGoAhead) => {
            TelnetCommand::Do
        }
        (TelnetCommand::Do, TelnetOption::SuppressGoAhead) => TelnetCommand::Will,
        (TelnetCommand::Will, _) => TelnetCommand::Dont,
        (TelnetCommand::Do, _) => TelnetCommand::Wont,
        _ => return None,
    };

    Some([IAC, reply as u8, option.as_byte()])
}

/// 將應用層資料中的 0xFF 轉義為 IAC IAC
pub fn escape_iac(data: &[u8], out: &mut BytesMut) {
    out.reserve(data.len());
    for &byte in data {
        if byte == IAC {
            out.put_u8(IAC);
        }
        out.put_u8(byte);
    }
}
