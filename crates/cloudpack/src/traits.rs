//! The `Pack`/`Unpack` contract for structured values.
//!
//! A type's `Pack` impl is its recursive wire descriptor: it writes its fields
//! through the `Encoder`, and `Unpack` reads them back in the same shape.

use std::collections::HashMap;

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::Result;

/// A value that can be written to an `Encoder`.
pub trait Pack {
    fn pack(&self, enc: &mut Encoder) -> Result<()>;
}

/// A value that can be read back from a `Decoder`.
pub trait Unpack: Sized {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self>;

    /// Reads the value while tolerating numeric wire types that differ from
    /// `Self`, widening or narrowing them when the value fits.
    ///
    /// Only primitives override this; structured types decode strictly.
    fn unpack_normalized(dec: &mut Decoder<'_>) -> Result<Self> {
        Self::unpack(dec)
    }
}

/// An opaque byte blob, encoded with `Tag::Bytes`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

macro_rules! integer {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Pack for $ty {
            fn pack(&self, enc: &mut Encoder) -> Result<()> {
                enc.$write(*self)
            }
        }

        impl Unpack for $ty {
            fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
                dec.$read()
            }

            fn unpack_normalized(dec: &mut Decoder<'_>) -> Result<Self> {
                let wide = dec.integer()?;
                <$ty>::try_from(wide).map_err(|_| Error::OutOfRange { target: stringify!($ty) })
            }
        }
    };
}

integer!(u8, u8, u8);
integer!(i8, i8, i8);
integer!(u16, u16, u16);
integer!(i16, i16, i16);
integer!(u32, u32, u32);
integer!(i32, i32, i32);
integer!(u64, u64, u64);
integer!(i64, i64, i64);

impl Pack for f32 {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.f32(*self) }
}

impl Unpack for f32 {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.f32() }
    fn unpack_normalized(dec: &mut Decoder<'_>) -> Result<Self> { Ok(dec.float()? as f32) }
}

impl Pack for f64 {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.f64(*self) }
}

impl Unpack for f64 {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.f64() }
    fn unpack_normalized(dec: &mut Decoder<'_>) -> Result<Self> { dec.float() }
}

impl Pack for bool {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.bool(*self) }
}

impl Unpack for bool {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.bool() }
}

impl Pack for char {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.char(*self) }
}

impl Unpack for char {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.char() }
}

impl Pack for () {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.unit() }
}

impl Unpack for () {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.unit() }
}

impl Pack for str {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.str(self) }
}

impl Pack for String {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.str(self) }
}

impl Unpack for String {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { Ok(dec.str()?.to_owned()) }
}

impl Pack for Blob {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.bytes(&self.0) }
}

impl Unpack for Blob {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { Ok(Blob(dec.bytes()?.to_vec())) }
}

impl<T: Pack + ?Sized> Pack for &T {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        (**self).pack(enc)
    }
}

/// A list of zero or one values, so an optional value is always a single item.
impl<T: Pack> Pack for Option<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.list_begin()?;
        if let Some(value) = self {
            value.pack(enc)?;
        }
        enc.list_end()
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        unpack_option(dec, T::unpack)
    }

    fn unpack_normalized(dec: &mut Decoder<'_>) -> Result<Self> {
        unpack_option(dec, T::unpack_normalized)
    }
}

fn unpack_option<'a, T>(
    dec: &mut Decoder<'a>,
    read: impl FnOnce(&mut Decoder<'a>) -> Result<T>,
) -> Result<Option<T>> {
    let mut items = dec.list()?;
    if items.is_empty() {
        return Ok(None);
    }
    let value = read(&mut items)?;
    if !items.is_empty() {
        return Err(Error::TrailingBytes(items.remaining()));
    }
    Ok(Some(value))
}

impl<T: Pack> Pack for [T] {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.list_begin()?;
        for item in self {
            item.pack(enc)?;
        }
        enc.list_end()
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        self.as_slice().pack(enc)
    }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut items = dec.list()?;
        let mut out = Vec::new();
        while !items.is_empty() {
            out.push(T::unpack(&mut items)?);
        }
        Ok(out)
    }

    fn unpack_normalized(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut items = dec.list()?;
        let mut out = Vec::new();
        while !items.is_empty() {
            out.push(T::unpack_normalized(&mut items)?);
        }
        Ok(out)
    }
}

impl<T: Pack> Pack for HashMap<String, T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.map_begin()?;
        for (key, value) in self {
            enc.field(key, value)?;
        }
        enc.map_end()
    }
}

impl<T: Unpack> Unpack for HashMap<String, T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut entries = dec.map()?;
        let mut out = HashMap::new();
        while let Some(key) = entries.next_key()? {
            let value = T::unpack(entries.value())?;
            out.insert(key.to_owned(), value);
        }
        Ok(out)
    }
}

/// Implements `Pack` and `Unpack` for a struct with named fields, encoded as a
/// map keyed by field name.
///
/// Unknown keys are skipped on decode so that newer senders stay readable.
/// Fields listed after `;` fall back to `Default` when absent.
///
/// ```ignore
/// cloudpack::record!(ServiceTemplate { prefix, name, storage; always_copy });
/// ```
#[macro_export]
macro_rules! record {
    ($ty:ident { $($field:ident),* $(,)? $(; $($opt:ident),* $(,)?)? }) => {
        impl $crate::Pack for $ty {
            fn pack(&self, enc: &mut $crate::Encoder) -> $crate::Result<()> {
                enc.map_begin()?;
                $( enc.field(stringify!($field), &self.$field)?; )*
                $($( enc.field(stringify!($opt), &self.$opt)?; )*)?
                enc.map_end()
            }
        }

        impl $crate::Unpack for $ty {
            fn unpack(dec: &mut $crate::Decoder<'_>) -> $crate::Result<Self> {
                let mut entries = dec.map()?;
                $( let mut $field = None; )*
                $($( let mut $opt = None; )*)?
                while let Some(key) = entries.next_key()? {
                    match key {
                        $( stringify!($field) => $field = Some(entries.value().unpack()?), )*
                        $($( stringify!($opt) => $opt = Some(entries.value().unpack()?), )*)?
                        _ => entries.value().skip()?,
                    }
                }
                Ok($ty {
                    $( $field: $field.ok_or($crate::Error::MissingField(stringify!($field)))?, )*
                    $($( $opt: $opt.unwrap_or_default(), )*)?
                })
            }
        }
    };
}
