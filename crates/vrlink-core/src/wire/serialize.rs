use std::marker::PhantomData;

use super::endian::{
    f32_from_network, f32_to_network, f64_from_network, f64_to_network, ByteOrderPolicy,
    NativeOrder, NetworkByteOrder,
};
use super::{Buffer, BufferReader, WireError};

/// A field type with a fixed wire representation
pub trait WireValue: Sized {
    fn encode<P: ByteOrderPolicy>(&self, buf: &mut Buffer) -> Result<(), WireError>;
    fn decode<P: ByteOrderPolicy>(reader: &mut BufferReader<'_>) -> Result<Self, WireError>;
}

macro_rules! impl_integer_wire_value {
    ($($t:ty),*) => {
        $(
            impl WireValue for $t {
                fn encode<P: ByteOrderPolicy>(&self, buf: &mut Buffer) -> Result<(), WireError> {
                    buf.append_aligned(&self.hton_with::<P>(), std::mem::size_of::<$t>());
                    Ok(())
                }

                fn decode<P: ByteOrderPolicy>(
                    reader: &mut BufferReader<'_>,
                ) -> Result<Self, WireError> {
                    let raw: $t = reader.read_aligned(std::mem::size_of::<$t>())?;
                    Ok(raw.ntoh_with::<P>())
                }
            }
        )*
    };
}

impl_integer_wire_value!(u8, i8, u16, i16, u32, i32, u64, i64);

impl WireValue for f32 {
    fn encode<P: ByteOrderPolicy>(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.append_aligned(&f32_to_network::<P>(*self), 4);
        Ok(())
    }

    fn decode<P: ByteOrderPolicy>(reader: &mut BufferReader<'_>) -> Result<Self, WireError> {
        let bits: u32 = reader.read_aligned(4)?;
        Ok(f32_from_network::<P>(bits))
    }
}

impl WireValue for f64 {
    fn encode<P: ByteOrderPolicy>(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.append_aligned(&f64_to_network::<P>(*self), 8);
        Ok(())
    }

    fn decode<P: ByteOrderPolicy>(reader: &mut BufferReader<'_>) -> Result<Self, WireError> {
        let bits: u64 = reader.read_aligned(8)?;
        Ok(f64_from_network::<P>(bits))
    }
}

impl WireValue for bool {
    fn encode<P: ByteOrderPolicy>(&self, buf: &mut Buffer) -> Result<(), WireError> {
        buf.append(&u8::from(*self));
        Ok(())
    }

    fn decode<P: ByteOrderPolicy>(reader: &mut BufferReader<'_>) -> Result<Self, WireError> {
        Ok(reader.read::<u8>()? != 0)
    }
}

fn encode_length<P: ByteOrderPolicy>(len: usize, buf: &mut Buffer) -> Result<(), WireError> {
    let len = u32::try_from(len).map_err(|_| WireError::TooLong(len))?;
    len.encode::<P>(buf)
}

fn decode_length<P: ByteOrderPolicy>(reader: &mut BufferReader<'_>) -> Result<usize, WireError> {
    let len = u32::decode::<P>(reader)?;
    usize::try_from(len).map_err(|_| WireError::TooLong(usize::MAX))
}

/// u32 length prefix followed by the raw bytes
impl WireValue for Vec<u8> {
    fn encode<P: ByteOrderPolicy>(&self, buf: &mut Buffer) -> Result<(), WireError> {
        encode_length::<P>(self.len(), buf)?;
        buf.append_bytes(self);
        Ok(())
    }

    fn decode<P: ByteOrderPolicy>(reader: &mut BufferReader<'_>) -> Result<Self, WireError> {
        let len = decode_length::<P>(reader)?;
        Ok(reader.read_bytes(len)?.to_vec())
    }
}

/// u32 length prefix followed by UTF-8 bytes, no terminator
impl WireValue for String {
    fn encode<P: ByteOrderPolicy>(&self, buf: &mut Buffer) -> Result<(), WireError> {
        encode_length::<P>(self.len(), buf)?;
        buf.append_bytes(self.as_bytes());
        Ok(())
    }

    fn decode<P: ByteOrderPolicy>(reader: &mut BufferReader<'_>) -> Result<Self, WireError> {
        let len = decode_length::<P>(reader)?;
        let bytes = reader.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidUtf8)
    }
}

impl<T: WireValue + Copy + Default, const N: usize> WireValue for [T; N] {
    fn encode<P: ByteOrderPolicy>(&self, buf: &mut Buffer) -> Result<(), WireError> {
        self.iter().try_for_each(|item| item.encode::<P>(buf))
    }

    fn decode<P: ByteOrderPolicy>(reader: &mut BufferReader<'_>) -> Result<Self, WireError> {
        let mut out = [T::default(); N];
        for slot in out.iter_mut() {
            *slot = T::decode::<P>(reader)?;
        }
        Ok(out)
    }
}

/// Walks the fields of a [`Message`] in declaration order
pub trait MessageVisitor {
    fn visit<T: WireValue>(&mut self, value: &mut T) -> Result<(), WireError>;

    fn visit_message<M: Message>(&mut self, message: &mut M) -> Result<(), WireError>
    where
        Self: Sized,
    {
        message.process_message(self)
    }
}

/// A message describes its layout once; the same description drives both
/// serialization and deserialization.
pub trait Message {
    fn process_message<V: MessageVisitor>(&mut self, visitor: &mut V) -> Result<(), WireError>;
}

struct Serializer<'b, P> {
    buf: &'b mut Buffer,
    policy: PhantomData<P>,
}

impl<P: ByteOrderPolicy> MessageVisitor for Serializer<'_, P> {
    fn visit<T: WireValue>(&mut self, value: &mut T) -> Result<(), WireError> {
        value.encode::<P>(self.buf)
    }
}

struct Deserializer<'r, 'a, P> {
    reader: &'r mut BufferReader<'a>,
    policy: PhantomData<P>,
}

impl<P: ByteOrderPolicy> MessageVisitor for Deserializer<'_, '_, P> {
    fn visit<T: WireValue>(&mut self, value: &mut T) -> Result<(), WireError> {
        *value = T::decode::<P>(self.reader)?;
        Ok(())
    }
}

pub fn serialize_with<P: ByteOrderPolicy, M: Message>(
    buf: &mut Buffer,
    message: &mut M,
) -> Result<(), WireError> {
    message.process_message(&mut Serializer::<P> {
        buf,
        policy: PhantomData,
    })
}

pub fn serialize<M: Message>(buf: &mut Buffer, message: &mut M) -> Result<(), WireError> {
    serialize_with::<NativeOrder, M>(buf, message)
}

pub fn deserialize_with<P: ByteOrderPolicy, M: Message>(
    reader: &mut BufferReader<'_>,
    message: &mut M,
) -> Result<(), WireError> {
    message.process_message(&mut Deserializer::<P> {
        reader,
        policy: PhantomData,
    })
}

pub fn deserialize<M: Message>(
    reader: &mut BufferReader<'_>,
    message: &mut M,
) -> Result<(), WireError> {
    deserialize_with::<NativeOrder, M>(reader, message)
}

pub fn to_bytes<M: Message>(message: &mut M) -> Result<Vec<u8>, WireError> {
    let mut buf = Buffer::new();
    serialize(&mut buf, message)?;
    Ok(buf.into_inner())
}

pub fn from_bytes<M: Message + Default>(bytes: &[u8]) -> Result<M, WireError> {
    let mut message = M::default();
    deserialize(&mut BufferReader::new(bytes), &mut message)?;
    Ok(message)
}
