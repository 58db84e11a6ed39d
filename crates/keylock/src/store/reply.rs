//! Uninterpreted store replies.
//!
//! Scripts may return any shape, so the executor hands back a [`Reply`] and
//! the caller decides what it accepts. Store-side errors never appear here;
//! they travel as `Err(redis::RedisError)`.

use crate::errors::KeylockError;
use redis::Value;
use std::fmt;

/// Tagged union over the reply shapes the store can return.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Missing value (`nil`).
    Nil,
    /// Integer reply.
    Integer(i64),
    /// Bulk string, kept as raw bytes.
    Bytes(Vec<u8>),
    /// Simple status string such as `OK`.
    Status(String),
    /// Nested reply list.
    Array(Vec<Reply>),
    /// RESP3-only shapes (maps, doubles, ...), kept as their debug rendering.
    Other(String),
}

impl Reply {
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Whether this is the `OK` status a successful write answers with.
    pub fn is_ok_status(&self) -> bool {
        matches!(self, Reply::Status(s) if s == "OK")
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Text view of a bulk or status reply. `None` for other shapes and for
    /// bulk strings that are not UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            Reply::Status(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce to an integer, failing hard on any other shape.
    ///
    /// # Errors
    ///
    /// Returns `KeylockError::UnexpectedReply` naming `operation` when the
    /// reply is not an integer.
    pub fn into_integer(self, operation: &'static str) -> Result<i64, KeylockError> {
        match self {
            Reply::Integer(n) => Ok(n),
            other => Err(KeylockError::UnexpectedReply {
                operation,
                reply: other.to_string(),
            }),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => Reply::Nil,
            Value::Int(n) => Reply::Integer(n),
            Value::BulkString(bytes) => Reply::Bytes(bytes),
            Value::SimpleString(status) => Reply::Status(status),
            Value::Okay => Reply::Status("OK".to_string()),
            Value::Array(items) => Reply::Array(items.into_iter().map(Reply::from).collect()),
            other => Reply::Other(format!("{other:?}")),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Nil => f.write_str("nil"),
            Reply::Integer(n) => write!(f, "(integer) {n}"),
            Reply::Bytes(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Reply::Status(status) => f.write_str(status),
            Reply::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Reply::Other(rendered) => f.write_str(rendered),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_from_redis_values() {
        assert_eq!(Reply::from(Value::Nil), Reply::Nil);
        assert_eq!(Reply::from(Value::Int(1)), Reply::Integer(1));
        assert_eq!(
            Reply::from(Value::BulkString(b"v1".to_vec())),
            Reply::Bytes(b"v1".to_vec())
        );
        assert_eq!(Reply::from(Value::Okay), Reply::Status("OK".to_string()));
        assert_eq!(
            Reply::from(Value::SimpleString("QUEUED".to_string())),
            Reply::Status("QUEUED".to_string())
        );
        assert_eq!(
            Reply::from(Value::Array(vec![Value::Int(1), Value::Nil])),
            Reply::Array(vec![Reply::Integer(1), Reply::Nil])
        );
    }

    #[test]
    fn test_resp3_only_values_are_kept_as_other() {
        let double = Reply::from(Value::Double(1.5));
        assert!(matches!(&double, Reply::Other(rendered) if rendered.contains("1.5")));
        assert!(double.as_integer().is_none());
        assert!(double.as_str().is_none());
        assert!(double.into_integer("release").is_err());

        assert!(matches!(Reply::from(Value::Boolean(true)), Reply::Other(_)));
        assert!(matches!(
            Reply::from(Value::Map(vec![(Value::Int(1), Value::Nil)])),
            Reply::Other(_)
        ));
    }

    #[test]
    fn test_ok_status_from_either_encoding() {
        assert!(Reply::from(Value::Okay).is_ok_status());
        assert!(Reply::from(Value::SimpleString("OK".to_string())).is_ok_status());
        assert!(!Reply::Status("QUEUED".to_string()).is_ok_status());
        assert!(!Reply::Bytes(b"OK".to_vec()).is_ok_status());
    }

    #[test]
    fn test_into_integer_rejects_other_shapes() {
        assert_eq!(Reply::Integer(0).into_integer("release").unwrap(), 0);

        let err = Reply::Bytes(b"1".to_vec()).into_integer("release").unwrap_err();
        assert!(matches!(
            err,
            KeylockError::UnexpectedReply {
                operation: "release",
                ..
            }
        ));

        assert!(Reply::Nil.into_integer("release").is_err());
        assert!(Reply::Array(vec![Reply::Integer(1)])
            .into_integer("release")
            .is_err());
    }

    #[test]
    fn test_text_views() {
        assert_eq!(Reply::Bytes(b"holder-a".to_vec()).as_str(), Some("holder-a"));
        assert_eq!(Reply::Status("OK".to_string()).as_str(), Some("OK"));
        assert_eq!(Reply::Bytes(vec![0xff, 0xfe]).as_str(), None);
        assert_eq!(Reply::Integer(3).as_str(), None);
        assert_eq!(Reply::Integer(3).as_integer(), Some(3));
        assert!(Reply::Nil.is_nil());
    }

    #[test]
    fn test_display() {
        assert_eq!(Reply::Nil.to_string(), "nil");
        assert_eq!(Reply::Integer(2).to_string(), "(integer) 2");
        assert_eq!(Reply::Bytes(b"v1".to_vec()).to_string(), "\"v1\"");
        assert_eq!(
            Reply::Array(vec![Reply::Integer(1), Reply::Nil]).to_string(),
            "[(integer) 1, nil]"
        );
    }
}
