//! # PipeKV Wire Protocol
//!
//! Purpose: Shared RESP2 types and codecs used by the async client and the
//! server simulator.
//!
//! ## Design Principles
//! 1. **Binary-Safe**: Bulk payloads are carried as `Bytes`, never as text.
//! 2. **Resumable Parsing**: The decoder keeps every piece of partial state so
//!    it can be fed one socket read at a time.
//! 3. **Fail Fast**: Malformed input is a hard error; the decoder never tries
//!    to resynchronize a broken stream.

pub mod decode;
pub mod encode;
pub mod error;
pub mod value;

pub use decode::{Decoder, MAX_BULK_LEN};
pub use encode::{encode_command, marshal, Arg};
pub use error::{DecodeError, DecodeResult};
pub use value::Value;
