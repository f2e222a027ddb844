use std::fmt;
use std::str::FromStr;

use super::error::{RecordError, RecordResult};

/// Primitive column type; every type has a fixed on-page width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,         // 4 bytes
    Float,       // 8 bytes
    Char(usize), // n bytes (zero padded)
}

impl DataType {
    /// Width in bytes of an encoded value
    pub fn size(&self) -> usize {
        match self {
            DataType::Int => 4,
            DataType::Float => 8,
            DataType::Char(n) => *n,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (DataType::Int, Value::Int(_))
                | (DataType::Float, Value::Float(_))
                | (DataType::Char(_), Value::String(_))
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int => write!(f, "INT"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Char(n) => write!(f, "CHAR({})", n),
        }
    }
}

impl FromStr for DataType {
    type Err = RecordError;

    /// Parses `INT`, `FLOAT`, `CHAR(n)` and `VARCHAR(n)`, case-insensitive
    fn from_str(s: &str) -> RecordResult<Self> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "INT" | "INTEGER" => return Ok(DataType::Int),
            "FLOAT" | "DOUBLE" => return Ok(DataType::Float),
            _ => {}
        }

        let inner = upper
            .strip_prefix("VARCHAR(")
            .or_else(|| upper.strip_prefix("CHAR("))
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| RecordError::SchemaMismatch(format!("Unknown column type: {}", s)))?;

        match inner.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(DataType::Char(n)),
            _ => Err(RecordError::SchemaMismatch(format!(
                "Invalid CHAR length in type: {}",
                s
            ))),
        }
    }
}

/// A single column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f64),
    String(String),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode into `out`, which must be exactly `data_type.size()` bytes.
    /// NULL is written as zeros; the caller records nullness in the record bitmap.
    pub fn encode_into(&self, data_type: &DataType, out: &mut [u8]) -> RecordResult<()> {
        if out.len() != data_type.size() {
            return Err(RecordError::Serialization(format!(
                "Column buffer is {} bytes, {} needs {}",
                out.len(),
                data_type,
                data_type.size()
            )));
        }
        if !data_type.accepts(self) {
            return Err(RecordError::TypeMismatch {
                expected: data_type.to_string(),
                actual: format!("{:?}", self),
            });
        }

        match self {
            Value::Int(i) => out.copy_from_slice(&i.to_le_bytes()),
            Value::Float(x) => out.copy_from_slice(&x.to_le_bytes()),
            Value::String(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > out.len() {
                    return Err(RecordError::Serialization(format!(
                        "String length {} exceeds {}",
                        bytes.len(),
                        data_type
                    )));
                }
                // Decoding stops at the first zero byte
                if bytes.contains(&0) {
                    return Err(RecordError::Serialization(format!(
                        "String {:?} contains a NUL byte",
                        s
                    )));
                }
                out[..bytes.len()].copy_from_slice(bytes);
                out[bytes.len()..].fill(0);
            }
            Value::Null => out.fill(0),
        }
        Ok(())
    }

    /// Decode a value of `data_type` from exactly `data_type.size()` bytes
    pub fn decode(bytes: &[u8], data_type: &DataType, is_null: bool) -> RecordResult<Self> {
        if bytes.len() != data_type.size() {
            return Err(RecordError::Deserialization(format!(
                "Expected {} bytes for {}, got {}",
                data_type.size(),
                data_type,
                bytes.len()
            )));
        }
        if is_null {
            return Ok(Value::Null);
        }

        match data_type {
            DataType::Int => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(bytes);
                Ok(Value::Int(i32::from_le_bytes(buf)))
            }
            DataType::Float => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Ok(Value::Float(f64::from_le_bytes(buf)))
            }
            DataType::Char(_) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let s = std::str::from_utf8(&bytes[..end])
                    .map_err(|e| RecordError::Deserialization(format!("Invalid UTF-8: {}", e)))?;
                Ok(Value::String(s.to_string()))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Null => write!(f, "NULL"),
        }
    }
}
