//! Append-only byte buffer and its reader

use zerocopy::{FromBytes, Immutable, IntoBytes};

use super::WireError;

/// Value written into alignment padding
pub const PADDING_BYTE: u8 = 0;

/// Bytes needed to bring `current_size` up to a multiple of `alignment`.
/// Alignments below 2 never need padding.
pub fn compute_alignment_padding(alignment: usize, current_size: usize) -> usize {
    if alignment < 2 {
        return 0;
    }
    match current_size % alignment {
        0 => 0,
        leftover => alignment - leftover,
    }
}

/// Append-only byte container used to build a message payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    bytes: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Append the in-memory bytes of `value`
    pub fn append<T: IntoBytes + Immutable>(&mut self, value: &T) {
        self.bytes.extend_from_slice(value.as_bytes());
    }

    /// Pad to `alignment`, then append `value`
    pub fn append_aligned<T: IntoBytes + Immutable>(&mut self, value: &T, alignment: usize) {
        self.append_padding(compute_alignment_padding(alignment, self.size()));
        self.append(value);
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn append_bytes_aligned(&mut self, bytes: &[u8], alignment: usize) {
        self.append_padding(compute_alignment_padding(alignment, self.size()));
        self.append_bytes(bytes);
    }

    pub fn append_padding(&mut self, count: usize) {
        self.bytes.resize(self.bytes.len() + count, PADDING_BYTE);
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn contents(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }

    pub fn start_reading(&self) -> BufferReader<'_> {
        BufferReader::new(&self.bytes)
    }
}

/// Sequential reader over a byte slice. Every read is bounds-checked.
#[derive(Debug, Clone)]
pub struct BufferReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn bytes_read(&self) -> usize {
        self.position
    }

    pub fn bytes_remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Read a value from its in-memory byte representation
    pub fn read<T: FromBytes>(&mut self) -> Result<T, WireError> {
        let needed = std::mem::size_of::<T>();
        let bytes = self.read_bytes(needed)?;
        T::read_from_bytes(bytes).map_err(|_| WireError::Truncated {
            needed,
            remaining: bytes.len(),
        })
    }

    /// Skip padding up to `alignment`, then read
    pub fn read_aligned<T: FromBytes>(&mut self, alignment: usize) -> Result<T, WireError> {
        self.skip_padding(compute_alignment_padding(alignment, self.bytes_read()))?;
        self.read()
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], WireError> {
        if self.bytes_remaining() < count {
            return Err(WireError::Truncated {
                needed: count,
                remaining: self.bytes_remaining(),
            });
        }
        let start = self.position;
        self.position += count;
        Ok(&self.data[start..self.position])
    }

    pub fn read_bytes_aligned(
        &mut self,
        count: usize,
        alignment: usize,
    ) -> Result<&'a [u8], WireError> {
        self.skip_padding(compute_alignment_padding(alignment, self.bytes_read()))?;
        self.read_bytes(count)
    }

    pub fn skip_padding(&mut self, count: usize) -> Result<(), WireError> {
        self.read_bytes(count).map(|_| ())
    }
}
