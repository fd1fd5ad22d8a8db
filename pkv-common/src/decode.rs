//! # Incremental RESP2 Decoder
//!
//! Purpose: Decode one value at a time from a byte stream that arrives in
//! arbitrarily small pieces.
//!
//! ## Design Principles
//! 1. **Resumable State Machine**: Every partial field (number digits, line
//!    text, bulk payload, unfinished arrays) lives on the decoder, so a read
//!    can end anywhere and the next call picks up from the same byte.
//! 2. **Exact Consumption**: Only bytes belonging to the current value are
//!    taken from the cursor; the rest stays for whoever reads next.
//! 3. **Explicit Nesting**: Arrays push a frame on a stack instead of
//!    recursing, so nesting depth costs heap, not call stack.
//! 4. **Sticky Failure**: After an error the decoder refuses further input.
//!
//! ## State Overview
//!
//! ```text
//! Type ──':'──▶ Number ─▶ NumberContinued ─\r─▶ NumberEnd ─\n─▶ Integer
//!      ──'$'──▶ Number ─▶ ... ─▶ Bulk(n) ─▶ BulkCr ─▶ BulkLf ─▶ BulkString
//!      ──'*'──▶ Number ─▶ ... ─▶ push frame ─▶ Type (per element)
//!      ──'+'──▶ Line ─\r─▶ LineEnd ─\n─▶ SimpleString
//!      ──'-'──▶ Line ─\r─▶ LineEnd ─\n─▶ Error
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{DecodeError, DecodeResult};
use crate::value::Value;

/// Largest bulk string the decoder accepts (512 MiB, the usual server limit).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// What a decoded number is going to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberKind {
    Integer,
    BulkLength,
    ArrayLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Simple,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Awaiting the one-byte type prefix.
    Type,
    /// Awaiting a sign or the first digit.
    Number(NumberKind),
    /// Accumulating digits until `\r`.
    NumberContinued {
        kind: NumberKind,
        negative: bool,
        value: i64,
        digits: bool,
    },
    /// Saw `\r` after a number, expecting `\n`.
    NumberEnd { kind: NumberKind, value: i64 },
    /// Accumulating simple/error text until `\r`.
    Line(LineKind),
    /// Saw `\r` after a line, expecting `\n`.
    LineEnd(LineKind),
    /// Copying the declared number of payload bytes.
    Bulk { remaining: usize },
    /// Payload copied, expecting `\r`.
    BulkCr,
    /// Expecting the final `\n` of a bulk string.
    BulkLf,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Type => "type prefix",
            State::Number(_) | State::NumberContinued { .. } => "number",
            State::NumberEnd { .. } => "number terminator",
            State::Line(LineKind::Simple) => "simple string",
            State::Line(LineKind::Error) => "error string",
            State::LineEnd(_) => "line terminator",
            State::Bulk { .. } => "bulk string",
            State::BulkCr | State::BulkLf => "bulk string terminator",
        }
    }
}

/// An array whose elements are still being decoded.
#[derive(Debug)]
struct ArrayFrame {
    expected: usize,
    items: Vec<Value>,
}

/// Single-value RESP2 decoder that can be paused and resumed at any byte.
///
/// After yielding a value the decoder returns to the `Type` state, so the
/// same instance can walk a stream of consecutive values.
#[derive(Debug)]
pub struct Decoder {
    state: State,
    frames: Vec<ArrayFrame>,
    // Partial simple/error text.
    line: Vec<u8>,
    // Partial bulk payload when it spans several reads.
    bulk: BytesMut,
    // Whole bulk payload split straight out of the input.
    payload: Option<Bytes>,
    failed: Option<DecodeError>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Creates a decoder waiting for a type prefix.
    pub fn new() -> Self {
        Decoder {
            state: State::Type,
            frames: Vec::new(),
            line: Vec::new(),
            bulk: BytesMut::new(),
            payload: None,
            failed: None,
        }
    }

    /// Returns true when no partial value is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::Type && self.frames.is_empty() && self.failed.is_none()
    }

    /// Feeds bytes from `buf`, advancing it past everything consumed.
    ///
    /// Returns `Ok(Some(value))` once a full value is decoded (remaining bytes
    /// are left in `buf`), or `Ok(None)` when the input ran out first.
    pub fn decode<B: Buf>(&mut self, buf: &mut B) -> DecodeResult<Option<Value>> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        match self.decode_inner(buf) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.failed = Some(err.clone());
                Err(err)
            }
        }
    }

    fn decode_inner<B: Buf>(&mut self, buf: &mut B) -> DecodeResult<Option<Value>> {
        while buf.has_remaining() {
            let finished = match self.state {
                State::Type => self.read_type(buf.get_u8())?,
                State::Number(kind) => {
                    let byte = buf.get_u8();
                    self.state = match byte {
                        b'-' => State::NumberContinued {
                            kind,
                            negative: true,
                            value: 0,
                            digits: false,
                        },
                        b'0'..=b'9' => State::NumberContinued {
                            kind,
                            negative: false,
                            value: i64::from(byte - b'0'),
                            digits: true,
                        },
                        _ => return Err(self.unexpected(byte)),
                    };
                    None
                }
                State::NumberContinued {
                    kind,
                    negative,
                    value,
                    digits,
                } => {
                    let byte = buf.get_u8();
                    match byte {
                        b'0'..=b'9' => {
                            let digit = i64::from(byte - b'0');
                            // Negative numbers accumulate downwards so i64::MIN fits.
                            let next = value.checked_mul(10).and_then(|v| {
                                if negative {
                                    v.checked_sub(digit)
                                } else {
                                    v.checked_add(digit)
                                }
                            });
                            let value = next.ok_or(DecodeError::Overflow)?;
                            self.state = State::NumberContinued {
                                kind,
                                negative,
                                value,
                                digits: true,
                            };
                        }
                        b'\r' if digits => self.state = State::NumberEnd { kind, value },
                        _ => return Err(self.unexpected(byte)),
                    }
                    None
                }
                State::NumberEnd { kind, value } => {
                    let byte = buf.get_u8();
                    if byte != b'\n' {
                        return Err(self.unexpected(byte));
                    }
                    self.finish_number(kind, value)?
                }
                State::Line(kind) => {
                    let chunk = buf.chunk();
                    match chunk.iter().position(|&b| b == b'\r') {
                        Some(idx) => {
                            self.line.extend_from_slice(&chunk[..idx]);
                            buf.advance(idx + 1);
                            self.state = State::LineEnd(kind);
                        }
                        None => {
                            let len = chunk.len();
                            self.line.extend_from_slice(chunk);
                            buf.advance(len);
                        }
                    }
                    None
                }
                State::LineEnd(kind) => {
                    let byte = buf.get_u8();
                    if byte != b'\n' {
                        return Err(self.unexpected(byte));
                    }
                    let line = std::mem::take(&mut self.line);
                    let text = String::from_utf8(line).map_err(|_| DecodeError::InvalidUtf8)?;
                    Some(match kind {
                        LineKind::Simple => Value::SimpleString(text),
                        LineKind::Error => Value::Error(text),
                    })
                }
                State::Bulk { remaining } => {
                    self.read_bulk(buf, remaining);
                    None
                }
                State::BulkCr => {
                    let byte = buf.get_u8();
                    if byte != b'\r' {
                        return Err(self.unexpected(byte));
                    }
                    self.state = State::BulkLf;
                    None
                }
                State::BulkLf => {
                    let byte = buf.get_u8();
                    if byte != b'\n' {
                        return Err(self.unexpected(byte));
                    }
                    let data = match self.payload.take() {
                        Some(data) => data,
                        None => self.bulk.split().freeze(),
                    };
                    Some(Value::BulkString(Some(data)))
                }
            };

            if let Some(value) = finished {
                if let Some(value) = self.complete(value) {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    fn read_type(&mut self, byte: u8) -> DecodeResult<Option<Value>> {
        self.state = match byte {
            b':' => State::Number(NumberKind::Integer),
            b'$' => State::Number(NumberKind::BulkLength),
            b'*' => State::Number(NumberKind::ArrayLength),
            b'+' => State::Line(LineKind::Simple),
            b'-' => State::Line(LineKind::Error),
            _ => return Err(self.unexpected(byte)),
        };
        Ok(None)
    }

    fn finish_number(&mut self, kind: NumberKind, value: i64) -> DecodeResult<Option<Value>> {
        match kind {
            NumberKind::Integer => Ok(Some(Value::Integer(value))),
            NumberKind::BulkLength => match value {
                -1 => Ok(Some(Value::BulkString(None))),
                0 => {
                    self.state = State::BulkCr;
                    Ok(None)
                }
                len if len < 0 => Err(DecodeError::InvalidLength(len)),
                len if len > MAX_BULK_LEN => Err(DecodeError::TooLarge(len)),
                len => {
                    self.state = State::Bulk {
                        remaining: len as usize,
                    };
                    Ok(None)
                }
            },
            NumberKind::ArrayLength => match value {
                -1 => Ok(Some(Value::Array(None))),
                0 => Ok(Some(Value::Array(Some(Vec::new())))),
                len if len < 0 => Err(DecodeError::InvalidLength(len)),
                len => {
                    let expected = usize::try_from(len).map_err(|_| DecodeError::Overflow)?;
                    self.frames.push(ArrayFrame {
                        expected,
                        // Cap the preallocation; the count comes off the wire.
                        items: Vec::with_capacity(expected.min(1024)),
                    });
                    self.state = State::Type;
                    Ok(None)
                }
            },
        }
    }

    fn read_bulk<B: Buf>(&mut self, buf: &mut B, remaining: usize) {
        if self.bulk.is_empty() && buf.remaining() >= remaining {
            // Whole payload is present: split it out without copying.
            self.payload = Some(buf.copy_to_bytes(remaining));
            self.state = State::BulkCr;
            return;
        }

        let mut remaining = remaining;
        while remaining > 0 && buf.has_remaining() {
            let chunk = buf.chunk();
            let take = chunk.len().min(remaining);
            self.bulk.extend_from_slice(&chunk[..take]);
            buf.advance(take);
            remaining -= take;
        }
        self.state = if remaining == 0 {
            State::BulkCr
        } else {
            State::Bulk { remaining }
        };
    }

    /// Hands a finished value to the innermost open array, closing arrays
    /// that become full. Returns the top-level value once there is one.
    fn complete(&mut self, mut value: Value) -> Option<Value> {
        self.state = State::Type;
        loop {
            match self.frames.last_mut() {
                None => return Some(value),
                Some(frame) => {
                    frame.items.push(value);
                    if frame.items.len() < frame.expected {
                        return None;
                    }
                }
            }
            let items = self.frames.pop().map(|frame| frame.items).unwrap_or_default();
            value = Value::Array(Some(items));
        }
    }

    fn unexpected(&self, byte: u8) -> DecodeError {
        DecodeError::UnexpectedByte {
            state: self.state.name(),
            byte,
        }
    }
}
