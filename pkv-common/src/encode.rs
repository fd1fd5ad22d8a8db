//! # Command Encoding
//!
//! Purpose: Marshal a command name and its positional arguments into the
//! RESP2 request form: an array of bulk strings.
//!
//! ## Design Principles
//! 1. **Total Function**: Every argument shape has an encoding; nothing fails.
//! 2. **Buffer Reuse**: Encoders append to a caller-provided `BytesMut`.
//! 3. **Text Integers**: Integers travel as decimal text inside bulk strings,
//!    never as `:` integers, because servers expect requests that way.

use bytes::{BufMut, Bytes, BytesMut};

/// One positional command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Raw bytes, sent as a bulk string.
    Bytes(Bytes),
    /// Integer, sent as its decimal text in a bulk string.
    Int(i64),
    /// Sent as the null bulk string `$-1`.
    Null,
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Bytes(Bytes::from(value))
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::from(value.as_str())
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(value: &[u8; N]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Self {
        Arg::Bytes(value)
    }
}

impl From<&Bytes> for Arg {
    fn from(value: &Bytes) -> Self {
        Arg::Bytes(value.clone())
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(i64::from(value))
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::Int(i64::from(value))
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        // Values past i64::MAX keep their exact text.
        match i64::try_from(value) {
            Ok(value) => Arg::Int(value),
            Err(_) => Arg::Bytes(Bytes::from(value.to_string())),
        }
    }
}

impl From<usize> for Arg {
    fn from(value: usize) -> Self {
        Arg::from(value as u64)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Arg::Null,
        }
    }
}

/// Appends `*<argc>\r\n` followed by the name and each argument.
pub fn encode_command(name: &str, args: &[Arg], out: &mut BytesMut) {
    out.put_u8(b'*');
    push_usize(out, args.len() + 1);
    out.put_slice(b"\r\n");
    push_bulk(out, name.as_bytes());
    for arg in args {
        match arg {
            Arg::Bytes(data) => push_bulk(out, data),
            Arg::Int(value) => {
                let mut digits = BytesMut::with_capacity(20);
                push_i64(&mut digits, *value);
                push_bulk(out, &digits);
            }
            Arg::Null => out.put_slice(b"$-1\r\n"),
        }
    }
}

/// Encodes a command into an immutable buffer.
pub fn marshal(name: &str, args: &[Arg]) -> Bytes {
    let mut out = BytesMut::with_capacity(16 + name.len() + 16 * args.len());
    encode_command(name, args, &mut out);
    out.freeze()
}

fn push_bulk(out: &mut BytesMut, data: &[u8]) {
    out.put_u8(b'$');
    push_usize(out, data.len());
    out.put_slice(b"\r\n");
    out.put_slice(data);
    out.put_slice(b"\r\n");
}

pub(crate) fn push_usize(out: &mut BytesMut, value: usize) {
    push_u64(out, value as u64);
}

fn push_u64(out: &mut BytesMut, mut value: u64) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}

pub(crate) fn push_i64(out: &mut BytesMut, value: i64) {
    if value < 0 {
        out.put_u8(b'-');
    }
    // unsigned_abs keeps i64::MIN representable.
    push_u64(out, value.unsigned_abs());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_set_command() {
        let bytes = marshal("SET", &["a".into(), "b".into()]);
        assert_eq!(&bytes[..], b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\nb\r\n");
    }

    #[test]
    fn encodes_bare_command() {
        assert_eq!(&marshal("PING", &[])[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn integers_travel_as_bulk_text() {
        let bytes = marshal("LREM", &["k".into(), 0.into(), Arg::Int(-12345)]);
        assert_eq!(
            &bytes[..],
            b"*4\r\n$4\r\nLREM\r\n$1\r\nk\r\n$1\r\n0\r\n$6\r\n-12345\r\n"
        );
    }

    #[test]
    fn null_argument_uses_null_bulk() {
        let bytes = marshal("SET", &["k".into(), Arg::from(None::<&str>)]);
        assert_eq!(&bytes[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$-1\r\n");
    }

    #[test]
    fn binary_arguments_are_copied_verbatim() {
        let bytes = marshal("ECHO", &[Arg::from(&[0xffu8, 0xfe, 0x00][..])]);
        assert_eq!(&bytes[..], b"*2\r\n$4\r\nECHO\r\n$3\r\n\xff\xfe\x00\r\n");
    }

    #[test]
    fn large_integers_keep_their_digits() {
        let bytes = marshal("INCRBY", &["k".into(), 123451234512345i64.into(), u64::MAX.into()]);
        assert_eq!(
            &bytes[..],
            b"*4\r\n$6\r\nINCRBY\r\n$1\r\nk\r\n$15\r\n123451234512345\r\n$20\r\n18446744073709551615\r\n"
        );
        let mut out = BytesMut::new();
        push_i64(&mut out, i64::MIN);
        assert_eq!(&out[..], b"-9223372036854775808");
    }
}
