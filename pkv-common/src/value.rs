//! # RESP2 Values
//!
//! Purpose: Represent one decoded reply (or one request, on the server side)
//! as a tagged union over the five RESP2 shapes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::encode::push_i64;

/// A single RESP2 value. Array elements are values themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `:123` replies.
    Integer(i64),
    /// `+OK` style replies.
    SimpleString(String),
    /// `-ERR ...` replies.
    Error(String),
    /// `$n` bulk strings, `None` for the `$-1` null bulk string.
    BulkString(Option<Bytes>),
    /// `*n` arrays, `None` for the `*-1` null array.
    Array(Option<Vec<Value>>),
}

impl Value {
    /// Builds a non-null bulk string.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Value::BulkString(Some(data.into()))
    }

    /// Builds a simple string.
    pub fn simple(text: impl Into<String>) -> Self {
        Value::SimpleString(text.into())
    }

    /// Builds an error reply.
    pub fn error(text: impl Into<String>) -> Self {
        Value::Error(text.into())
    }

    /// Returns true for the null bulk string and the null array.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::BulkString(None) | Value::Array(None))
    }

    /// Returns the payload of a bulk or simple string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::BulkString(Some(data)) => Some(data),
            Value::SimpleString(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Serializes the value in RESP2 form.
    pub fn encode_into(&self, out: &mut BytesMut) {
        match self {
            Value::Integer(value) => {
                out.put_u8(b':');
                push_i64(out, *value);
                out.put_slice(b"\r\n");
            }
            Value::SimpleString(text) => {
                out.put_u8(b'+');
                out.put_slice(text.as_bytes());
                out.put_slice(b"\r\n");
            }
            Value::Error(text) => {
                out.put_u8(b'-');
                out.put_slice(text.as_bytes());
                out.put_slice(b"\r\n");
            }
            Value::BulkString(None) => out.put_slice(b"$-1\r\n"),
            Value::BulkString(Some(data)) => {
                out.put_u8(b'$');
                push_i64(out, data.len() as i64);
                out.put_slice(b"\r\n");
                out.put_slice(data);
                out.put_slice(b"\r\n");
            }
            Value::Array(None) => out.put_slice(b"*-1\r\n"),
            Value::Array(Some(items)) => {
                out.put_u8(b'*');
                push_i64(out, items.len() as i64);
                out.put_slice(b"\r\n");
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }

    /// Serializes the value into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode_into(&mut out);
        out.freeze()
    }
}
