//! 時間長度解析
//!
//! 格式如 `"30s"`、`"1m30s"`、`"500ms"`、`"1.5h"`；設定檔與 `/wait` 共用。

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("空的時間長度")]
    Empty,

    #[error("無效的時間長度 {0:?}")]
    Invalid(String),

    #[error("時間長度 {input:?} 缺少單位")]
    MissingUnit { input: String },

    #[error("未知的時間單位 {unit:?}（於 {input:?}）")]
    UnknownUnit { input: String, unit: String },
}

fn unit_nanos(unit: &str) -> Option<f64> {
    Some(match unit {
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return None,
    })
}

/// 解析時間長度
///
/// 單獨的 `"0"` 允許省略單位；負數不被接受。
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || DurationError::Invalid(input.to_string());
    let mut rest = s.strip_prefix('+').unwrap_or(s);
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = 0f64;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..num_len];
        if number.is_empty() || number == "." {
            return Err(invalid());
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        if unit.is_empty() {
            return Err(DurationError::MissingUnit {
                input: input.to_string(),
            });
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            input: input.to_string(),
            unit: unit.to_string(),
        })?;
        total += value * scale;
        rest = &rest[unit_len..];
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total.round() as u64))
}

/// serde 輔助：以字串表示的時間長度
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_compound_and_fraction() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(" 10us ").unwrap(), Duration::from_micros(10));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_duration(""), Err(DurationError::Empty));
        assert!(matches!(parse_duration("10"), Err(DurationError::MissingUnit { .. })));
        assert!(matches!(parse_duration("10x"), Err(DurationError::UnknownUnit { .. })));
        assert!(matches!(parse_duration("-5s"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("abc"), Err(DurationError::Invalid(_))));
    }

    #[test]
    fn test_deserialize_helper() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "super::deserialize")]
            every: Duration,
        }

        let w: Wrapper = serde_json::from_str(r#"{"every": "1m"}"#).unwrap();
        assert_eq!(w.every, Duration::from_secs(60));
        assert!(serde_json::from_str::<Wrapper>(r#"{"every": "soon"}"#).is_err());
    }
}
