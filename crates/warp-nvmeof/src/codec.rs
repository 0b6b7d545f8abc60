//! Descriptor-driven wire codec
//!
//! Every wire record declares its byte layout once, with the
//! [`wire_record!`](crate::wire_record) macro: one [`FieldSpec`] per field
//! giving the field's offset, an optional fixed length and an optional array
//! stride. One generic pair of routines ([`Field::put`] / [`Field::get`])
//! walks that table to pack and unpack the record.
//!
//! - Integers are little-endian and fixed width.
//! - Strings are fixed length, NUL padded (or space padded when the field is
//!   marked [`FieldSpec::space_padded`]) and cut at the first NUL on read.
//! - Arrays repeat their element at `offset + i * stride`; the stride defaults
//!   to the element's natural size.
//! - Nested records are encoded into the sub-buffer starting at their offset.
//!
//! Reading or writing past the end of the buffer is always an
//! [`CodecError::OutOfBounds`] error. Nothing is silently truncated.
//!
//! ```
//! use warp_nvmeof::codec::{at, WireRecord};
//! use warp_nvmeof::wire_record;
//!
//! wire_record! {
//!     #[derive(Debug, Clone, PartialEq, Eq)]
//!     pub struct Example {
//!         pub kind: u8 => at(0),
//!         pub length: u32 => at(4),
//!         pub name: String => at(8).len(8),
//!     }
//! }
//!
//! let record = Example { kind: 1, length: 42, name: "warp".into() };
//! let bytes = record.to_bytes().unwrap();
//! assert_eq!(bytes.len(), 16);
//! assert_eq!(Example::decode(&bytes).unwrap(), record);
//! ```

use thiserror::Error;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Field does not fit in the buffer
    #[error("field `{field}` out of bounds: {offset}+{len} exceeds buffer of {available} bytes")]
    OutOfBounds {
        /// Field name
        field: &'static str,
        /// Absolute field offset
        offset: usize,
        /// Bytes required at that offset
        len: usize,
        /// Buffer length
        available: usize,
    },

    /// String or blob field declared without a length
    #[error("field `{field}` requires a fixed length")]
    MissingLength {
        /// Field name
        field: &'static str,
    },

    /// String value longer than its fixed field
    #[error("field `{field}` holds {len} bytes but is only {max} wide")]
    ValueTooLong {
        /// Field name
        field: &'static str,
        /// Value length
        len: usize,
        /// Field width
        max: usize,
    },
}

/// Layout of one field: where it lives and how it repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name, used in error messages
    pub name: &'static str,
    /// Byte offset from the start of the enclosing record
    pub offset: usize,
    /// Fixed length in bytes (strings and blobs)
    pub len: Option<usize>,
    /// Distance between array elements
    pub stride: Option<usize>,
    /// Fill byte used after a string's contents
    pub fill: u8,
}

/// Start a field descriptor at `offset`
pub const fn at(offset: usize) -> FieldSpec {
    FieldSpec {
        name: "",
        offset,
        len: None,
        stride: None,
        fill: 0,
    }
}

impl FieldSpec {
    /// Set a fixed length
    pub const fn len(mut self, len: usize) -> Self {
        self.len = Some(len);
        self
    }

    /// Set the array element stride
    pub const fn stride(mut self, stride: usize) -> Self {
        self.stride = Some(stride);
        self
    }

    /// Pad strings with spaces instead of NULs
    pub const fn space_padded(mut self) -> Self {
        self.fill = b' ';
        self
    }

    /// Attach the field name
    pub const fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    fn element(&self, index: usize, stride: usize) -> Self {
        Self {
            name: self.name,
            offset: self.offset + index * stride,
            len: None,
            stride: None,
            fill: self.fill,
        }
    }

    fn out_of_bounds(&self, len: usize, available: usize) -> CodecError {
        CodecError::OutOfBounds {
            field: self.name,
            offset: self.offset,
            len,
            available,
        }
    }
}

fn window<'a>(buf: &'a [u8], spec: &FieldSpec, len: usize) -> CodecResult<&'a [u8]> {
    let available = buf.len();
    spec.offset
        .checked_add(len)
        .and_then(|end| buf.get(spec.offset..end))
        .ok_or_else(|| spec.out_of_bounds(len, available))
}

fn window_mut<'a>(buf: &'a mut [u8], spec: &FieldSpec, len: usize) -> CodecResult<&'a mut [u8]> {
    let available = buf.len();
    spec.offset
        .checked_add(len)
        .and_then(|end| buf.get_mut(spec.offset..end))
        .ok_or_else(|| spec.out_of_bounds(len, available))
}

/// Sub-buffer a nested record decodes from
#[doc(hidden)]
pub fn nested<'a>(buf: &'a [u8], spec: &FieldSpec) -> CodecResult<&'a [u8]> {
    let available = buf.len();
    buf.get(spec.offset..).ok_or_else(|| spec.out_of_bounds(0, available))
}

/// Sub-buffer a nested record encodes into
#[doc(hidden)]
pub fn nested_mut<'a>(buf: &'a mut [u8], spec: &FieldSpec) -> CodecResult<&'a mut [u8]> {
    let available = buf.len();
    buf.get_mut(spec.offset..)
        .ok_or_else(|| spec.out_of_bounds(0, available))
}

/// A value that can be packed at a [`FieldSpec`]
pub trait Field: Sized {
    /// Natural encoded size of one value
    fn size() -> usize;

    /// All-zero value
    fn zeroed() -> Self;

    /// Encode into `buf` at `spec`
    fn put(&self, buf: &mut [u8], spec: &FieldSpec) -> CodecResult<()>;

    /// Decode from `buf` at `spec`
    fn get(buf: &[u8], spec: &FieldSpec) -> CodecResult<Self>;

    /// One past the last byte this field touches
    fn extent(spec: &FieldSpec) -> usize {
        spec.offset + spec.len.unwrap_or_else(Self::size)
    }
}

macro_rules! le_field {
    ($($ty:ty),*) => {$(
        impl Field for $ty {
            fn size() -> usize {
                std::mem::size_of::<$ty>()
            }

            fn zeroed() -> Self {
                0
            }

            fn put(&self, buf: &mut [u8], spec: &FieldSpec) -> CodecResult<()> {
                window_mut(buf, spec, Self::size())?.copy_from_slice(&self.to_le_bytes());
                Ok(())
            }

            fn get(buf: &[u8], spec: &FieldSpec) -> CodecResult<Self> {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(window(buf, spec, Self::size())?);
                Ok(<$ty>::from_le_bytes(raw))
            }

            fn extent(spec: &FieldSpec) -> usize {
                spec.offset + Self::size()
            }
        }
    )*};
}

le_field!(u8, u16, u32, u64);

impl Field for String {
    fn size() -> usize {
        0
    }

    fn zeroed() -> Self {
        String::new()
    }

    fn put(&self, buf: &mut [u8], spec: &FieldSpec) -> CodecResult<()> {
        let len = spec
            .len
            .ok_or(CodecError::MissingLength { field: spec.name })?;
        let raw = self.as_bytes();
        if raw.len() > len {
            return Err(CodecError::ValueTooLong {
                field: spec.name,
                len: raw.len(),
                max: len,
            });
        }
        let out = window_mut(buf, spec, len)?;
        out[..raw.len()].copy_from_slice(raw);
        out[raw.len()..].fill(spec.fill);
        Ok(())
    }

    fn get(buf: &[u8], spec: &FieldSpec) -> CodecResult<Self> {
        let len = spec
            .len
            .ok_or(CodecError::MissingLength { field: spec.name })?;
        let raw = window(buf, spec, len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let text = String::from_utf8_lossy(&raw[..end]);
        let text: &str = text.as_ref();
        let text = if spec.fill == b' ' {
            text.trim_end_matches(' ')
        } else {
            text
        };
        Ok(text.to_owned())
    }
}

impl<T: Field, const N: usize> Field for [T; N] {
    fn size() -> usize {
        N * T::size()
    }

    fn zeroed() -> Self {
        std::array::from_fn(|_| T::zeroed())
    }

    fn put(&self, buf: &mut [u8], spec: &FieldSpec) -> CodecResult<()> {
        let stride = spec.stride.unwrap_or_else(T::size);
        for (i, item) in self.iter().enumerate() {
            item.put(buf, &spec.element(i, stride))?;
        }
        Ok(())
    }

    fn get(buf: &[u8], spec: &FieldSpec) -> CodecResult<Self> {
        let stride = spec.stride.unwrap_or_else(T::size);
        let mut out = Self::zeroed();
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = T::get(buf, &spec.element(i, stride))?;
        }
        Ok(out)
    }

    fn extent(spec: &FieldSpec) -> usize {
        let stride = spec.stride.unwrap_or_else(T::size);
        match N {
            0 => spec.offset,
            n => T::extent(&spec.element(n - 1, stride)),
        }
    }
}

/// A top-level wire record
pub trait WireRecord: Field {
    /// Field descriptor table, in declaration order
    const FIELDS: &'static [FieldSpec];

    /// Bytes needed to hold the record
    fn encoded_len() -> usize {
        Self::size()
    }

    /// Encode into the front of `buf`
    fn encode_into(&self, buf: &mut [u8]) -> CodecResult<()> {
        self.put(buf, &at(0))
    }

    /// Decode from the front of `buf`
    fn decode(buf: &[u8]) -> CodecResult<Self> {
        Self::get(buf, &at(0))
    }

    /// Encode into a freshly allocated buffer of exactly `encoded_len` bytes
    fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut buf = vec![0u8; Self::encoded_len()];
        self.encode_into(&mut buf)?;
        Ok(buf)
    }
}

/// Encode `record` at `offset` inside a larger buffer
pub fn encode_at<R: WireRecord>(buf: &mut [u8], offset: usize, record: &R) -> CodecResult<()> {
    record.put(buf, &at(offset).named(std::any::type_name::<R>()))
}

/// Declare a wire record and its byte layout
///
/// Each field is written `name: Type => spec`, where `spec` is a
/// [`FieldSpec`](crate::codec::FieldSpec) built from
/// [`at`](crate::codec::at). The macro emits the struct, its
/// [`Field`](crate::codec::Field) and
/// [`WireRecord`](crate::codec::WireRecord) impls, and a zeroing `Default`.
#[macro_export]
macro_rules! wire_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty => $spec:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::codec::Field for $name {
            fn size() -> usize {
                0usize $(
                    .max(<$ty as $crate::codec::Field>::extent(&$spec.named(stringify!($field))))
                )*
            }

            fn zeroed() -> Self {
                Self {
                    $( $field: <$ty as $crate::codec::Field>::zeroed(), )*
                }
            }

            fn put(
                &self,
                buf: &mut [u8],
                spec: &$crate::codec::FieldSpec,
            ) -> $crate::codec::CodecResult<()> {
                let buf = $crate::codec::nested_mut(buf, spec)?;
                $(
                    $crate::codec::Field::put(&self.$field, buf, &$spec.named(stringify!($field)))?;
                )*
                Ok(())
            }

            fn get(
                buf: &[u8],
                spec: &$crate::codec::FieldSpec,
            ) -> $crate::codec::CodecResult<Self> {
                let buf = $crate::codec::nested(buf, spec)?;
                Ok(Self {
                    $(
                        $field: <$ty as $crate::codec::Field>::get(
                            buf,
                            &$spec.named(stringify!($field)),
                        )?,
                    )*
                })
            }
        }

        impl $crate::codec::WireRecord for $name {
            const FIELDS: &'static [$crate::codec::FieldSpec] = &[
                $( $spec.named(stringify!($field)), )*
            ];
        }

        impl Default for $name {
            fn default() -> Self {
                <Self as $crate::codec::Field>::zeroed()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire_record;

    wire_record! {
        #[derive(Debug, Clone, PartialEq, Eq)]
        struct Inner {
            id: u16 => at(0),
            tag: u8 => at(3),
        }
    }

    wire_record! {
        #[derive(Debug, Clone, PartialEq, Eq)]
        struct Outer {
            kind: u8 => at(0),
            size: u64 => at(8),
            serial: String => at(16).len(8).space_padded(),
            nqn: String => at(24).len(16),
            blob: [u8; 4] => at(40),
            words: [u32; 3] => at(44),
            inner: [Inner; 2] => at(56).stride(8),
            single: Inner => at(72),
        }
    }

    fn sample() -> Outer {
        Outer {
            kind: 4,
            size: 0x0102_0304_0506_0708,
            serial: "SN1".into(),
            nqn: "nqn.test".into(),
            blob: [1, 2, 3, 4],
            words: [10, 20, 30],
            inner: [Inner { id: 7, tag: 1 }, Inner { id: 8, tag: 2 }],
            single: Inner { id: 0xBEEF, tag: 9 },
        }
    }

    #[test]
    fn test_field_table_matches_declaration() {
        let names: Vec<_> = Outer::FIELDS.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            ["kind", "size", "serial", "nqn", "blob", "words", "inner", "single"]
        );
        assert_eq!(Outer::FIELDS[2].len, Some(8));
        assert_eq!(Outer::FIELDS[6].stride, Some(8));
    }

    #[test]
    fn test_encoded_len_covers_last_field() {
        // single: offset 72, Inner spans 4 bytes
        assert_eq!(Outer::encoded_len(), 76);
        assert_eq!(Inner::encoded_len(), 4);
    }

    #[test]
    fn test_layout_is_little_endian_at_offsets() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(bytes[0], 4);
        assert_eq!(&bytes[8..16], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[16..24], b"SN1     ");
        assert_eq!(&bytes[24..32], b"nqn.test");
        assert!(bytes[32..40].iter().all(|&b| b == 0));
        assert_eq!(&bytes[44..48], &10u32.to_le_bytes());
        assert_eq!(&bytes[56..58], &7u16.to_le_bytes());
        assert_eq!(bytes[59], 1);
        assert_eq!(&bytes[64..66], &8u16.to_le_bytes());
        assert_eq!(&bytes[72..74], &0xBEEFu16.to_le_bytes());
    }

    #[test]
    fn test_round_trip() {
        let record = sample();
        let bytes = record.to_bytes().unwrap();
        assert_eq!(Outer::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_strings_cut_at_nul() {
        let mut buf = vec![0u8; Outer::encoded_len()];
        buf[24..29].copy_from_slice(b"ab\0cd");
        let decoded = Outer::decode(&buf).unwrap();
        assert_eq!(decoded.nqn, "ab");
    }

    #[test]
    fn test_short_buffer_is_out_of_bounds() {
        let mut buf = vec![0u8; 40];
        let err = sample().encode_into(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::OutOfBounds { field: "blob", .. }));

        let err = Outer::decode(&buf).unwrap_err();
        assert!(matches!(err, CodecError::OutOfBounds { .. }));
    }

    #[test]
    fn test_long_string_is_rejected() {
        let mut record = sample();
        record.serial = "way too long for eight".into();
        let err = record.to_bytes().unwrap_err();
        assert_eq!(
            err,
            CodecError::ValueTooLong {
                field: "serial",
                len: 22,
                max: 8
            }
        );
    }

    #[test]
    fn test_string_without_length_is_rejected() {
        wire_record! {
            struct Broken {
                text: String => at(0),
            }
        }
        let err = Broken { text: "x".into() }.to_bytes().unwrap_err();
        assert_eq!(err, CodecError::MissingLength { field: "text" });
    }

    #[test]
    fn test_encode_at_offset() {
        let mut buf = vec![0u8; 16];
        encode_at(&mut buf, 10, &Inner { id: 0x1234, tag: 5 }).unwrap();
        assert_eq!(&buf[10..12], &[0x34, 0x12]);
        assert_eq!(buf[13], 5);
        assert!(encode_at(&mut buf, 14, &Inner::default()).is_err());
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use crate::wire_record;
    use proptest::prelude::*;

    wire_record! {
        #[derive(Debug, Clone, PartialEq, Eq)]
        struct Entry {
            id: u16 => at(0),
            flags: u8 => at(2),
            tag: String => at(4).len(6).space_padded(),
        }
    }

    wire_record! {
        #[derive(Debug, Clone, PartialEq, Eq)]
        struct Sample {
            a: u8 => at(0),
            b: u16 => at(2),
            c: u32 => at(4),
            d: u64 => at(8),
            name: String => at(16).len(24),
            label: String => at(40).len(8).space_padded(),
            table: [u32; 4] => at(48).stride(8),
            entries: [Entry; 3] => at(80).stride(12),
        }
    }

    fn entry() -> impl Strategy<Value = Entry> {
        (any::<u16>(), any::<u8>(), text(6)).prop_map(|(id, flags, tag)| Entry { id, flags, tag })
    }

    fn text(max: usize) -> impl Strategy<Value = String> {
        prop::collection::vec(0x21u8..0x7f, 0..=max)
            .prop_map(|bytes| String::from_utf8(bytes).unwrap_or_default())
    }

    proptest! {
        /// Property: decode(encode(x)) == x for any valid field values
        #[test]
        fn record_roundtrip(
            a in any::<u8>(),
            b in any::<u16>(),
            c in any::<u32>(),
            d in any::<u64>(),
            name in text(24),
            label in text(8),
            table in any::<[u32; 4]>(),
            entries in [entry(), entry(), entry()],
        ) {
            let record = Sample { a, b, c, d, name, label, table, entries };
            let bytes = record.to_bytes().unwrap();
            prop_assert_eq!(bytes.len(), Sample::encoded_len());
            prop_assert_eq!(Sample::decode(&bytes).unwrap(), record);
        }
    }
}
