//! Bit-exact wire encoding for report messages
//!
//! Fields are written in network byte order, each arithmetic field padded to
//! its natural alignment relative to the start of the buffer, so every peer
//! decodes the same bytes regardless of host endianness.

mod buffer;
mod endian;
mod serialize;

pub use buffer::{compute_alignment_padding, Buffer, BufferReader, PADDING_BYTE};
pub use endian::{
    integer_byte_swap, safe_pun, swap_float_words, ByteOrderPolicy, ByteSwap, ForceSwap,
    MixedFloatWords, NativeOrder, NetworkByteOrder, NoSwap,
};
pub use serialize::{
    deserialize, deserialize_with, from_bytes, serialize, serialize_with, to_bytes, Message,
    MessageVisitor, WireValue,
};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Buffer underflow: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("String field is not valid UTF-8")]
    InvalidUtf8,
    #[error("Field of {0} bytes is too long for a u32 length prefix")]
    TooLong(usize),
}
