//! 客戶端命令
//!
//! 以 `/` 開頭的輸入在本地執行，不送往伺服器。欄位以空白分隔，
//! `{...}` 視為單一欄位（可含空白與分號）。

use std::time::Duration;

use thiserror::Error;

use crate::duration::{parse_duration, DurationError};
use crate::pattern::Pattern;

/// `/wait` 的上限，等待期間無法中斷
pub const MAX_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldsError {
    #[error("大括號不可巢狀")]
    Nested,

    #[error("多餘的 '}}'")]
    Unexpected,

    #[error("缺少 '}}'")]
    Unclosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("未知的命令: {0}")]
    Unknown(String),

    #[error("用法: {0}")]
    Usage(&'static str),

    #[error("無法解析欄位: {0}")]
    Fields(#[from] FieldsError),

    #[error("不是數字: {0:?}")]
    NotANumber(String),

    #[error(transparent)]
    Duration(#[from] DurationError),
}

/// 切分欄位
///
/// ```
/// use mudcore::command::split_fields;
///
/// assert_eq!(split_fields("/on {You are hungry} {eat bread}").unwrap(), vec!["/on", "You are hungry", "eat bread"]);
/// ```
pub fn split_fields(input: &str) -> Result<Vec<String>, FieldsError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut braced = false;

    for c in input.chars() {
        if braced {
            match c {
                '{' => return Err(FieldsError::Nested),
                '}' => {
                    fields.push(std::mem::take(&mut current));
                    braced = false;
                }
                _ => current.push(c),
            }
            continue;
        }

        match c {
            '{' => {
                if in_word {
                    fields.push(std::mem::take(&mut current));
                    in_word = false;
                }
                braced = true;
            }
            '}' => return Err(FieldsError::Unexpected),
            c if c.is_whitespace() => {
                if in_word {
                    fields.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if braced {
        return Err(FieldsError::Unclosed);
    }
    if in_word {
        fields.push(current);
    }
    Ok(fields)
}

/// `/list` 的操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOp {
    /// 把第 `index` 項存到變數 `var`
    Get { index: usize, var: String },
    Push(String),
    /// 取出最後一項，可選擇存到變數
    Pop(Option<String>),
    Print,
}

/// 客戶端命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Set(Vec<(String, String)>),
    Vars,
    Aliases,
    Tick,
    Wait(Duration),
    TriggersOn,
    TriggersOff,
    History,
    ClearHistory,
    Dump(String),
    On { pattern: Pattern, action: String },
    List { name: String, op: ListOp },
    Incr { var: String, amount: i64 },
}

const USAGE_SET: &str = "/set <name>=<value> ...";
const USAGE_WAIT: &str = "/wait <duration>";
const USAGE_DUMP: &str = "/dump <name>";
const USAGE_ON: &str = "/on <pattern> <action>";
const USAGE_LIST: &str = "/list <name> get <index> <var> | push <value> | pop [var] | print";
const USAGE_INCR: &str = "/incr <var> <n>";

fn no_args(
    args: &[String],
    usage: &'static str,
    cmd: ClientCommand,
) -> Result<ClientCommand, CommandError> {
    if args.is_empty() {
        Ok(cmd)
    } else {
        Err(CommandError::Usage(usage))
    }
}

fn number<T: std::str::FromStr>(s: &str) -> Result<T, CommandError> {
    s.parse().map_err(|_| CommandError::NotANumber(s.to_string()))
}

impl ClientCommand {
    /// 解析一行 `/` 命令
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let fields = split_fields(line.trim())?;
        let Some((name, args)) = fields.split_first() else {
            return Err(CommandError::Unknown(String::new()));
        };

        match name.as_str() {
            "/set" => {
                if args.is_empty() {
                    return Err(CommandError::Usage(USAGE_SET));
                }
                args.iter()
                    .map(|arg| {
                        arg.split_once('=')
                            .filter(|(k, _)| !k.is_empty())
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .ok_or(CommandError::Usage(USAGE_SET))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Set)
            }
            "/vars" => no_args(args, "/vars", Self::Vars),
            "/aliases" => no_args(args, "/aliases", Self::Aliases),
            "/tick" => no_args(args, "/tick", Self::Tick),
            "/wait" => match args {
                [d] => Ok(Self::Wait(parse_duration(d)?)),
                _ => Err(CommandError::Usage(USAGE_WAIT)),
            },
            "/triggers-on" | "/enable-triggers" => no_args(args, "/triggers-on", Self::TriggersOn),
            "/triggers-off" | "/disable-triggers" => {
                no_args(args, "/triggers-off", Self::TriggersOff)
            }
            "/history" => no_args(args, "/history", Self::History),
            "/clear-history" => no_args(args, "/clear-history", Self::ClearHistory),
            "/dump" => match args {
                [name] => Ok(Self::Dump(name.clone())),
                _ => Err(CommandError::Usage(USAGE_DUMP)),
            },
            "/on" => match args {
                [pattern, action] if !pattern.is_empty() => Ok(Self::On {
                    pattern: Pattern::from(pattern.as_str()),
                    action: action.clone(),
                }),
                _ => Err(CommandError::Usage(USAGE_ON)),
            },
            "/list" => {
                let op = match args.get(1..).unwrap_or_default() {
                    [op, index, var] if op == "get" => ListOp::Get {
                        index: number(index)?,
                        var: var.clone(),
                    },
                    [op, value] if op == "push" => ListOp::Push(value.clone()),
                    [op] if op == "pop" => ListOp::Pop(None),
                    [op, var] if op == "pop" => ListOp::Pop(Some(var.clone())),
                    [op] if op == "print" => ListOp::Print,
                    _ => return Err(CommandError::Usage(USAGE_LIST)),
                };
                let Some(name) = args.first() else {
                    return Err(CommandError::Usage(USAGE_LIST));
                };
                Ok(Self::List { name: name.clone(), op })
            }
            "/incr" => match args {
                [var, n] => Ok(Self::Incr {
                    var: var.clone(),
                    amount: number(n)?,
                }),
                _ => Err(CommandError::Usage(USAGE_INCR)),
            },
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}
