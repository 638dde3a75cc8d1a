//! 热点参数值
//!
//! 调用方在进入引擎前已将集合/数组参数摊平为标量，
//! 这里只承载去重后的标量键。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 热点参数的标量值
///
/// 作为逐值计数器的键使用，因此必须可哈希；浮点值按位模式存储
/// 以满足 `Eq`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    /// 布尔值
    Bool(bool),
    /// 有符号整数
    Int(i64),
    /// 无符号整数
    Uint(u64),
    /// 浮点值（IEEE-754 位模式）
    Float(u64),
    /// 字符串
    Str(String),
}

impl ParamValue {
    /// 由浮点数构造，按位模式存储
    pub fn from_f64(value: f64) -> Self {
        ParamValue::Float(value.to_bits())
    }

    /// 浮点变体还原为 f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Uint(v) => write!(f, "{}", v),
            ParamValue::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            ParamValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::Uint(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::from_f64(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashSet;

    #[test]
    fn test_distinct_values_hash_apart() {
        let mut set = AHashSet::new();
        set.insert(ParamValue::from(1i64));
        set.insert(ParamValue::from(1u64));
        set.insert(ParamValue::from("1"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_float_equality_by_bits() {
        assert_eq!(ParamValue::from(0.5f64), ParamValue::from_f64(0.5));
        assert_ne!(ParamValue::from(0.5f64), ParamValue::from(-0.5f64));
        assert_eq!(ParamValue::from(0.5f64).as_f64(), Some(0.5));
    }

    #[test]
    fn test_display() {
        assert_eq!(ParamValue::from("api_key").to_string(), "api_key");
        assert_eq!(ParamValue::from(42i64).to_string(), "42");
    }
}
