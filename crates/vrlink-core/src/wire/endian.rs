//! Host/network byte order conversion
//!
//! The conversion is parameterised by a [`ByteOrderPolicy`] describing the
//! host: [`NativeOrder`] is the machine this code runs on, the others model
//! big-endian and mixed-endian hosts so both conversion paths can be
//! exercised anywhere.

use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Host memory layout relative to network (big-endian) order
pub trait ByteOrderPolicy {
    /// Multi-byte values must be byte-swapped to reach network order
    const SWAP_BYTES: bool;
    /// `f64` values are stored with their two 32-bit words exchanged
    const MIXED_FLOAT_WORDS: bool;
}

/// The host this binary runs on
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeOrder;

impl ByteOrderPolicy for NativeOrder {
    const SWAP_BYTES: bool = cfg!(target_endian = "little");
    const MIXED_FLOAT_WORDS: bool = cfg!(feature = "mixed-float-words");
}

/// A little-endian host
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceSwap;

impl ByteOrderPolicy for ForceSwap {
    const SWAP_BYTES: bool = true;
    const MIXED_FLOAT_WORDS: bool = false;
}

/// A big-endian host
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSwap;

impl ByteOrderPolicy for NoSwap {
    const SWAP_BYTES: bool = false;
    const MIXED_FLOAT_WORDS: bool = false;
}

/// A little-endian host whose doubles keep the high word first
#[derive(Debug, Clone, Copy, Default)]
pub struct MixedFloatWords;

impl ByteOrderPolicy for MixedFloatWords {
    const SWAP_BYTES: bool = true;
    const MIXED_FLOAT_WORDS: bool = true;
}

/// Reinterpret the bytes of `src` as a `Dest` of the same size
pub fn safe_pun<Dest, Src>(src: Src) -> Dest
where
    Src: IntoBytes + Immutable,
    Dest: FromBytes,
{
    const {
        assert!(std::mem::size_of::<Src>() == std::mem::size_of::<Dest>());
    }
    match Dest::read_from_bytes(src.as_bytes()) {
        Ok(dest) => dest,
        Err(_) => unreachable!("sizes are checked at compile time"),
    }
}

/// Integers that can reverse their byte order
pub trait ByteSwap: Copy {
    fn byte_swap(self) -> Self;
}

macro_rules! impl_byte_swap {
    ($($t:ty),*) => {
        $(
            impl ByteSwap for $t {
                #[inline]
                fn byte_swap(self) -> Self {
                    self.swap_bytes()
                }
            }
        )*
    };
}

impl_byte_swap!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128);

/// Reverse the byte order of an integer
#[inline]
pub fn integer_byte_swap<T: ByteSwap>(value: T) -> T {
    value.byte_swap()
}

/// Exchange the two 32-bit words of a 64-bit pattern
#[inline]
pub fn swap_float_words(bits: u64) -> u64 {
    bits.rotate_left(32)
}

/// Conversion between host and network byte order. Both directions are
/// the same involution.
pub trait NetworkByteOrder: Copy {
    fn hton_with<P: ByteOrderPolicy>(self) -> Self;

    fn ntoh_with<P: ByteOrderPolicy>(self) -> Self {
        self.hton_with::<P>()
    }

    fn hton(self) -> Self {
        self.hton_with::<NativeOrder>()
    }

    fn ntoh(self) -> Self {
        self.ntoh_with::<NativeOrder>()
    }
}

macro_rules! impl_integer_network_order {
    ($($t:ty),*) => {
        $(
            impl NetworkByteOrder for $t {
                #[inline]
                fn hton_with<P: ByteOrderPolicy>(self) -> Self {
                    if P::SWAP_BYTES {
                        integer_byte_swap(self)
                    } else {
                        self
                    }
                }
            }
        )*
    };
}

impl_integer_network_order!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Network bit pattern of an `f32` as stored on a `P` host
pub(crate) fn f32_to_network<P: ByteOrderPolicy>(value: f32) -> u32 {
    safe_pun::<u32, f32>(value).hton_with::<P>()
}

pub(crate) fn f32_from_network<P: ByteOrderPolicy>(bits: u32) -> f32 {
    safe_pun::<f32, u32>(bits.ntoh_with::<P>())
}

/// Network bit pattern of an `f64` as stored on a `P` host
pub(crate) fn f64_to_network<P: ByteOrderPolicy>(value: f64) -> u64 {
    let mut bits = safe_pun::<u64, f64>(value).hton_with::<P>();
    if P::MIXED_FLOAT_WORDS {
        bits = swap_float_words(bits);
    }
    bits
}

pub(crate) fn f64_from_network<P: ByteOrderPolicy>(bits: u64) -> f64 {
    let mut bits = bits;
    if P::MIXED_FLOAT_WORDS {
        bits = swap_float_words(bits);
    }
    safe_pun::<f64, u64>(bits.ntoh_with::<P>())
}

impl NetworkByteOrder for f32 {
    fn hton_with<P: ByteOrderPolicy>(self) -> Self {
        safe_pun(f32_to_network::<P>(self))
    }

    fn ntoh_with<P: ByteOrderPolicy>(self) -> Self {
        f32_from_network::<P>(safe_pun(self))
    }
}

impl NetworkByteOrder for f64 {
    fn hton_with<P: ByteOrderPolicy>(self) -> Self {
        safe_pun(f64_to_network::<P>(self))
    }

    fn ntoh_with<P: ByteOrderPolicy>(self) -> Self {
        f64_from_network::<P>(safe_pun(self))
    }
}
