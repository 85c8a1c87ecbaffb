//! # Cloudpack
//!
//! The binary object codec shared by every cloudnet packet.
//!
//! ## Philosophy
//!
//! - **Self-describing**: every value starts with a one byte `Tag`, so a reader can
//!   detect a type mismatch and skip values it does not understand.
//! - **Length-prefixed containers**: strings, byte blobs, lists and maps carry
//!   their body length, which makes skipping a whole container O(1).
//! - **Explicit contract**: structured types opt in through `Pack` and `Unpack`;
//!   there is no reflection and no hidden schema.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//! - **Maps**: a container whose body alternates `String` keys and values.
//!
//! All integers are Little-Endian.

mod traits;

pub use traits::Blob;
pub use traits::Pack;
pub use traits::Unpack;

#[cfg(test)]
mod tests;

/// Codec failures.
///
/// Every variant is fatal to the value currently being decoded, never to the
/// buffer owner: callers decide whether the surrounding call or connection dies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted before the expected field.
    UnexpectedEnd,
    /// Byte does not correspond to a known `Tag`.
    UnknownTag(u8),
    /// A known tag was found where another one was expected.
    TypeMismatch { expected: &'static str, found: Tag },
    /// String data is not valid UTF-8, or a char is not a scalar value.
    InvalidUtf8,
    /// A normalized numeric value does not fit into the requested type.
    OutOfRange { target: &'static str },
    /// A record was missing a required field.
    MissingField(&'static str),
    /// An optional value held more than one item; carries the leftover byte count.
    TrailingBytes(usize),
    /// Blob or container length exceeds `u32::MAX`.
    TooLarge(usize),
    /// Closing a container that is not the innermost open one.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Closing a container when none is open.
    ScopeUnderflow,
    /// Finalizing the buffer while containers are still open.
    ScopeStillOpen,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd => write!(f, "buffer exhausted before the expected field"),
            Error::UnknownTag(b) => write!(f, "unknown type tag {:#04x}", b),
            Error::TypeMismatch { expected, found } => {
                write!(f, "expected {}, found {:?}", expected, found)
            }
            Error::InvalidUtf8 => write!(f, "invalid utf-8 data"),
            Error::OutOfRange { target } => write!(f, "value does not fit into {}", target),
            Error::TooLarge(len) => write!(f, "length {} exceeds u32::MAX", len),
            Error::MissingField(name) => write!(f, "missing field '{}'", name),
            Error::TrailingBytes(len) => write!(f, "{} trailing bytes after optional value", len),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    BoolTrue = 0x01,
    BoolFalse = 0x02,
    U8 = 0x03,
    U16 = 0x04,
    U32 = 0x05,
    U64 = 0x06,
    I8 = 0x07,
    I16 = 0x08,
    I32 = 0x09,
    I64 = 0x0A,
    F32 = 0x0B,
    F64 = 0x0C,
    Char = 0x0D,
    Unit = 0x0E,

    String = 0x10,
    Bytes = 0x11,

    List = 0x20,
    Map = 0x21,
}

impl Tag {
    /// Returns the Tag for a given byte, or `None` if unknown.
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => Tag::BoolTrue,
            0x02 => Tag::BoolFalse,
            0x03 => Tag::U8,
            0x04 => Tag::U16,
            0x05 => Tag::U32,
            0x06 => Tag::U64,
            0x07 => Tag::I8,
            0x08 => Tag::I16,
            0x09 => Tag::I32,
            0x0A => Tag::I64,
            0x0B => Tag::F32,
            0x0C => Tag::F64,
            0x0D => Tag::Char,
            0x0E => Tag::Unit,
            0x10 => Tag::String,
            0x11 => Tag::Bytes,
            0x20 => Tag::List,
            0x21 => Tag::Map,
            _ => return None,
        })
    }

    /// Number of payload bytes following a fixed-width tag, `None` for
    /// length-prefixed tags.
    fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::BoolTrue | Tag::BoolFalse | Tag::Unit => Some(0),
            Tag::U8 | Tag::I8 => Some(1),
            Tag::U16 | Tag::I16 => Some(2),
            Tag::U32 | Tag::I32 | Tag::F32 | Tag::Char => Some(4),
            Tag::U64 | Tag::I64 | Tag::F64 => Some(8),
            Tag::String | Tag::Bytes | Tag::List | Tag::Map => None,
        }
    }
}

/// Kind of an open container on the `Encoder` stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    List,
    Map,
}

struct OpenScope {
    /// Offset of the first body byte; the length header sits right before it.
    body_start: usize,
    scope: Scope,
}

/// A growable encoder with back-patched container lengths.
///
/// `Encoder::new()` is the "create empty" allocation mode, `with_capacity` the
/// "create with expected size" mode used when the final size is known up front.
pub struct Encoder {
    buf: Vec<u8>,
    open: Vec<OpenScope>,
}

impl Encoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Creates an encoder whose buffer is pre-sized to `expected` bytes.
    pub fn with_capacity(expected: usize) -> Self {
        Self {
            buf: Vec::with_capacity(expected),
            open: Vec::new(),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder and returns the final bytes.
    ///
    /// # Errors
    /// Returns `Error::ScopeStillOpen` if a container was not closed.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn tag(&mut self, tag: Tag) {
        self.buf.push(tag as u8);
    }

    fn len_prefixed(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::TooLarge(data.len()))?;
        self.tag(tag);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn begin(&mut self, tag: Tag, scope: Scope) {
        self.tag(tag);
        self.buf.extend_from_slice(&[0; 4]);
        self.open.push(OpenScope { body_start: self.buf.len(), scope });
    }

    fn end(&mut self, expected: Scope) -> Result<()> {
        let Some(top) = self.open.last() else {
            return Err(Error::ScopeUnderflow);
        };
        if top.scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: top.scope });
        }
        let body_start = top.body_start;
        let body_len = self.buf.len() - body_start;
        let len = u32::try_from(body_len).map_err(|_| Error::TooLarge(body_len))?;
        self.buf[body_start - 4..body_start].copy_from_slice(&len.to_le_bytes());
        self.open.pop();
        Ok(())
    }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.tag(if v { Tag::BoolTrue } else { Tag::BoolFalse });
        Ok(())
    }

    pub fn u8(&mut self, v: u8) -> Result<()> { self.tag(Tag::U8); self.buf.push(v); Ok(()) }
    pub fn i8(&mut self, v: i8) -> Result<()> { self.tag(Tag::I8); self.buf.push(v as u8); Ok(()) }
    pub fn u16(&mut self, v: u16) -> Result<()> { self.tag(Tag::U16); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn i16(&mut self, v: i16) -> Result<()> { self.tag(Tag::I16); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn u32(&mut self, v: u32) -> Result<()> { self.tag(Tag::U32); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn i32(&mut self, v: i32) -> Result<()> { self.tag(Tag::I32); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn u64(&mut self, v: u64) -> Result<()> { self.tag(Tag::U64); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn i64(&mut self, v: i64) -> Result<()> { self.tag(Tag::I64); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn f32(&mut self, v: f32) -> Result<()> { self.tag(Tag::F32); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }
    pub fn f64(&mut self, v: f64) -> Result<()> { self.tag(Tag::F64); self.buf.extend_from_slice(&v.to_le_bytes()); Ok(()) }

    /// Encodes a char as its u32 scalar value.
    pub fn char(&mut self, v: char) -> Result<()> { self.tag(Tag::Char); self.buf.extend_from_slice(&(v as u32).to_le_bytes()); Ok(()) }

    /// Encodes Unit `()`.
    pub fn unit(&mut self) -> Result<()> { self.tag(Tag::Unit); Ok(()) }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.len_prefixed(Tag::String, v.as_bytes())
    }

    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.len_prefixed(Tag::Bytes, v)
    }

    /// Appends bytes that already hold complete, encoded items.
    ///
    /// Used to embed a pre-encoded argument list or payload without decoding it.
    pub fn raw(&mut self, encoded: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(encoded);
        Ok(())
    }

    /// Begins a List container. Must be closed via `list_end()`.
    pub fn list_begin(&mut self) -> Result<()> { self.begin(Tag::List, Scope::List); Ok(()) }
    pub fn list_end(&mut self) -> Result<()> { self.end(Scope::List) }

    /// Begins a Map container. Entries are written as `key()` followed by one value.
    pub fn map_begin(&mut self) -> Result<()> { self.begin(Tag::Map, Scope::Map); Ok(()) }
    pub fn map_end(&mut self) -> Result<()> { self.end(Scope::Map) }

    /// Writes a map key.
    pub fn key(&mut self, key: &str) -> Result<()> {
        match self.open.last() {
            Some(top) if top.scope == Scope::Map => self.str(key),
            Some(top) => Err(Error::ScopeMismatch { expected: Scope::Map, actual: top.scope }),
            None => Err(Error::ScopeUnderflow),
        }
    }

    /// Encodes any `Pack` value.
    pub fn pack<T: Pack + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.pack(self)
    }

    /// Convenience for a `key` followed by a packed value.
    pub fn field<T: Pack + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        self.key(key)?;
        value.pack(self)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the cursor. Container reads return new `Decoder`s restricted
/// to the container body, so the outer cursor is already past the container.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the unread part of the view.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    /// Peeks the next Tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::UnknownTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    fn expect(&mut self, expected: Tag, name: &'static str) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::TypeMismatch { expected: name, found });
        }
        self.buf = &self.buf[1..];
        Ok(())
    }

    /// Skips the next item, including nested children.
    pub fn skip(&mut self) -> Result<()> {
        self.item_bytes().map(|_| ())
    }

    /// Returns the complete encoding (tag included) of the next item and advances past it.
    pub fn item_bytes(&mut self) -> Result<&'a [u8]> {
        let start = self.buf;
        let tag = self.peek_tag()?;
        let body = match tag.fixed_width() {
            Some(width) => 1 + width,
            None => {
                let mut header = Decoder::new(&self.buf[1..]);
                5 + header.take_len()?
            }
        };
        self.take(body)?;
        Ok(&start[..body])
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::BoolTrue => { self.take(1)?; Ok(true) }
            Tag::BoolFalse => { self.take(1)?; Ok(false) }
            found => Err(Error::TypeMismatch { expected: "bool", found }),
        }
    }

    pub fn u8(&mut self) -> Result<u8> { self.expect(Tag::U8, "u8")?; Ok(self.take_array::<1>()?[0]) }
    pub fn i8(&mut self) -> Result<i8> { self.expect(Tag::I8, "i8")?; Ok(self.take_array::<1>()?[0] as i8) }
    pub fn u16(&mut self) -> Result<u16> { self.expect(Tag::U16, "u16")?; Ok(u16::from_le_bytes(self.take_array()?)) }
    pub fn i16(&mut self) -> Result<i16> { self.expect(Tag::I16, "i16")?; Ok(i16::from_le_bytes(self.take_array()?)) }
    pub fn u32(&mut self) -> Result<u32> { self.expect(Tag::U32, "u32")?; Ok(u32::from_le_bytes(self.take_array()?)) }
    pub fn i32(&mut self) -> Result<i32> { self.expect(Tag::I32, "i32")?; Ok(i32::from_le_bytes(self.take_array()?)) }
    pub fn u64(&mut self) -> Result<u64> { self.expect(Tag::U64, "u64")?; Ok(u64::from_le_bytes(self.take_array()?)) }
    pub fn i64(&mut self) -> Result<i64> { self.expect(Tag::I64, "i64")?; Ok(i64::from_le_bytes(self.take_array()?)) }
    pub fn f32(&mut self) -> Result<f32> { self.expect(Tag::F32, "f32")?; Ok(f32::from_le_bytes(self.take_array()?)) }
    pub fn f64(&mut self) -> Result<f64> { self.expect(Tag::F64, "f64")?; Ok(f64::from_le_bytes(self.take_array()?)) }

    pub fn char(&mut self) -> Result<char> {
        self.expect(Tag::Char, "char")?;
        char::from_u32(u32::from_le_bytes(self.take_array()?)).ok_or(Error::InvalidUtf8)
    }

    pub fn unit(&mut self) -> Result<()> { self.expect(Tag::Unit, "unit") }

    /// Reads any integer tag, widened to `i128`.
    ///
    /// This is the entry point of primitive normalization: the caller narrows the
    /// value back into the declared parameter type.
    pub fn integer(&mut self) -> Result<i128> {
        Ok(match self.peek_tag()? {
            Tag::U8 => self.u8()? as i128,
            Tag::I8 => self.i8()? as i128,
            Tag::U16 => self.u16()? as i128,
            Tag::I16 => self.i16()? as i128,
            Tag::U32 => self.u32()? as i128,
            Tag::I32 => self.i32()? as i128,
            Tag::U64 => self.u64()? as i128,
            Tag::I64 => self.i64()? as i128,
            found => return Err(Error::TypeMismatch { expected: "integer", found }),
        })
    }

    /// Reads any float or integer tag as `f64`.
    pub fn float(&mut self) -> Result<f64> {
        match self.peek_tag()? {
            Tag::F32 => Ok(self.f32()? as f64),
            Tag::F64 => self.f64(),
            _ => Ok(self.integer()? as f64),
        }
    }

    /// Decodes a string slice (UTF-8).
    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::String, "string")?;
        let len = self.take_len()?;
        std::str::from_utf8(self.take(len)?).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a byte slice.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes, "bytes")?;
        let len = self.take_len()?;
        self.take(len)
    }

    fn enter(&mut self, tag: Tag, name: &'static str) -> Result<Decoder<'a>> {
        self.expect(tag, name)?;
        let len = self.take_len()?;
        Ok(Decoder::new(self.take(len)?))
    }

    /// Enters a List; the returned decoder yields the items back to back.
    pub fn list(&mut self) -> Result<Decoder<'a>> {
        self.enter(Tag::List, "list")
    }

    /// Enters a Map and returns an iterator over its entries.
    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map, "map")? })
    }

    /// Counts the items left in this view without consuming them.
    pub fn count_items(&self) -> Result<usize> {
        let mut cursor = self.clone();
        let mut count = 0;
        while !cursor.is_empty() {
            cursor.skip()?;
            count += 1;
        }
        Ok(count)
    }

    /// Decodes any `Unpack` value.
    pub fn unpack<T: Unpack>(&mut self) -> Result<T> {
        T::unpack(self)
    }
}

/// Iterator over the `(key, value)` entries of a Map.
#[derive(Debug, Clone)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns the next key and a decoder positioned at its value, or `None`.
    ///
    /// The value must be consumed (or skipped) before the next call.
    pub fn next_key(&mut self) -> Result<Option<&'a str>> {
        if self.dec.is_empty() {
            return Ok(None);
        }
        self.dec.str().map(Some)
    }

    /// The decoder positioned at the current value.
    pub fn value(&mut self) -> &mut Decoder<'a> {
        &mut self.dec
    }
}
