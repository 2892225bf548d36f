//! Fixed-width argument layouts.
//!
//! A [`Layout`] is an ordered list of [`FieldCode`]s. It can be parsed from
//! a struct-style format string, where each letter names one big-endian
//! primitive and an optional decimal count repeats it:
//!
//! | Code | Type | Width |
//! |------|------|-------|
//! | `b`  | i8   | 1 |
//! | `B`  | u8   | 1 |
//! | `?`  | bool | 1 |
//! | `h`  | i16  | 2 |
//! | `H`  | u16  | 2 |
//! | `i`, `l` | i32 | 4 |
//! | `I`, `L` | u32 | 4 |
//! | `q`  | i64  | 8 |
//! | `Q`  | u64  | 8 |
//!
//! `"4BH2B"` is four `u8`, one `u16`, then two `u8`. Whitespace is ignored.
//!
//! Typed procedures derive their layout from a [`WireArgs`] tuple instead.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Widest layout accepted by [`Layout::parse`]: the largest UDP payload.
pub const MAX_LAYOUT_WIDTH: usize = 65_507;

/// One fixed-width primitive field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldCode {
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl FieldCode {
    /// Parse a single format letter.
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'b' => Self::I8,
            'B' => Self::U8,
            '?' => Self::Bool,
            'h' => Self::I16,
            'H' => Self::U16,
            'i' | 'l' => Self::I32,
            'I' | 'L' => Self::U32,
            'q' => Self::I64,
            'Q' => Self::U64,
            _ => return None,
        })
    }

    /// The canonical format letter.
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::I8 => 'b',
            Self::U8 => 'B',
            Self::Bool => '?',
            Self::I16 => 'h',
            Self::U16 => 'H',
            Self::I32 => 'i',
            Self::U32 => 'I',
            Self::I64 => 'q',
            Self::U64 => 'Q',
        }
    }

    /// Encoded width in bytes.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Bool => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 => 4,
            Self::I64 | Self::U64 => 8,
        }
    }
}

/// A decoded argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireValue {
    I8(i8),
    U8(u8),
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
}

impl WireValue {
    /// The field code this value encodes as.
    #[must_use]
    pub fn code(self) -> FieldCode {
        match self {
            Self::I8(_) => FieldCode::I8,
            Self::U8(_) => FieldCode::U8,
            Self::Bool(_) => FieldCode::Bool,
            Self::I16(_) => FieldCode::I16,
            Self::U16(_) => FieldCode::U16,
            Self::I32(_) => FieldCode::I32,
            Self::U32(_) => FieldCode::U32,
            Self::I64(_) => FieldCode::I64,
            Self::U64(_) => FieldCode::U64,
        }
    }

    /// The value as a wide integer. `bool` maps to 0 or 1.
    #[must_use]
    pub fn as_i128(self) -> i128 {
        match self {
            Self::I8(v) => v.into(),
            Self::U8(v) => v.into(),
            Self::Bool(v) => v.into(),
            Self::I16(v) => v.into(),
            Self::U16(v) => v.into(),
            Self::I32(v) => v.into(),
            Self::U32(v) => v.into(),
            Self::I64(v) => v.into(),
            Self::U64(v) => v.into(),
        }
    }

    /// Convert to `code`, if the value fits its range. Any integer converts
    /// to `bool` by truthiness.
    #[must_use]
    pub fn convert(self, code: FieldCode) -> Option<Self> {
        let v = self.as_i128();
        Some(match code {
            FieldCode::I8 => Self::I8(i8::try_from(v).ok()?),
            FieldCode::U8 => Self::U8(u8::try_from(v).ok()?),
            FieldCode::Bool => Self::Bool(v != 0),
            FieldCode::I16 => Self::I16(i16::try_from(v).ok()?),
            FieldCode::U16 => Self::U16(u16::try_from(v).ok()?),
            FieldCode::I32 => Self::I32(i32::try_from(v).ok()?),
            FieldCode::U32 => Self::U32(u32::try_from(v).ok()?),
            FieldCode::I64 => Self::I64(i64::try_from(v).ok()?),
            FieldCode::U64 => Self::U64(u64::try_from(v).ok()?),
        })
    }

    fn write(self, out: &mut Vec<u8>) {
        match self {
            Self::I8(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::U8(v) => out.push(v),
            Self::Bool(v) => out.push(u8::from(v)),
            Self::I16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::I32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::I64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::U64(v) => out.extend_from_slice(&v.to_be_bytes()),
        }
    }

    /// Read one value of `code` from the front of `bytes`, returning it and
    /// the rest of the buffer.
    fn read(code: FieldCode, bytes: &[u8]) -> Option<(Self, &[u8])> {
        if bytes.len() < code.width() {
            return None;
        }
        let (head, rest) = bytes.split_at(code.width());
        let value = match code {
            FieldCode::I8 => Self::I8(i8::from_be_bytes(head.try_into().ok()?)),
            FieldCode::U8 => Self::U8(head[0]),
            FieldCode::Bool => Self::Bool(head[0] != 0),
            FieldCode::I16 => Self::I16(i16::from_be_bytes(head.try_into().ok()?)),
            FieldCode::U16 => Self::U16(u16::from_be_bytes(head.try_into().ok()?)),
            FieldCode::I32 => Self::I32(i32::from_be_bytes(head.try_into().ok()?)),
            FieldCode::U32 => Self::U32(u32::from_be_bytes(head.try_into().ok()?)),
            FieldCode::I64 => Self::I64(i64::from_be_bytes(head.try_into().ok()?)),
            FieldCode::U64 => Self::U64(u64::from_be_bytes(head.try_into().ok()?)),
        };
        Some((value, rest))
    }
}

/// An ordered list of fixed-width fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Layout {
    fields: Vec<FieldCode>,
}

impl Layout {
    /// Build a layout from explicit fields.
    #[must_use]
    pub fn from_fields(fields: Vec<FieldCode>) -> Self {
        Self { fields }
    }

    /// Parse a struct-style format string.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidFormat`] on an unknown letter, a count with
    /// no letter after it, or a layout wider than [`MAX_LAYOUT_WIDTH`].
    pub fn parse(format: &str) -> Result<Self, NetError> {
        let invalid = |reason: String| NetError::InvalidFormat {
            format: format.to_string(),
            reason,
        };

        let mut fields = Vec::new();
        let mut width = 0_usize;
        let mut count: Option<usize> = None;
        for c in format.chars() {
            if c.is_whitespace() {
                if count.is_some() {
                    return Err(invalid("repeat count must precede a field code".into()));
                }
                continue;
            }
            if let Some(digit) = c.to_digit(10) {
                let next = count
                    .unwrap_or(0)
                    .checked_mul(10)
                    .and_then(|n| n.checked_add(digit as usize))
                    .ok_or_else(|| invalid("repeat count overflow".into()))?;
                count = Some(next);
                continue;
            }
            let code = FieldCode::from_char(c)
                .ok_or_else(|| invalid(format!("unknown field code '{c}'")))?;
            let repeat = count.take().unwrap_or(1);
            width = repeat
                .checked_mul(code.width())
                .and_then(|w| w.checked_add(width))
                .filter(|&w| w <= MAX_LAYOUT_WIDTH)
                .ok_or_else(|| invalid(format!("wider than {MAX_LAYOUT_WIDTH} bytes")))?;
            fields.extend(std::iter::repeat_n(code, repeat));
        }

        if count.is_some() {
            return Err(invalid("trailing repeat count".into()));
        }
        Ok(Self { fields })
    }

    /// The fields in order.
    #[must_use]
    pub fn fields(&self) -> &[FieldCode] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the layout has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encoded width in bytes.
    #[must_use]
    pub fn width(&self) -> usize {
        self.fields.iter().map(|f| f.width()).sum()
    }

    /// Append `values` to `out`, converting each to its field's code.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::ValueMismatch`] if the value count differs from
    /// the field count or a value does not fit its field.
    pub fn encode(&self, values: &[WireValue], out: &mut Vec<u8>) -> Result<(), NetError> {
        if values.len() != self.fields.len() {
            return Err(NetError::ValueMismatch(format!(
                "layout '{self}' takes {} values, got {}",
                self.fields.len(),
                values.len()
            )));
        }
        out.reserve(self.width());
        for (index, (&code, &value)) in self.fields.iter().zip(values).enumerate() {
            let converted = value.convert(code).ok_or_else(|| {
                NetError::ValueMismatch(format!(
                    "value {value:?} at position {index} does not fit '{}'",
                    code.as_char()
                ))
            })?;
            converted.write(out);
        }
        Ok(())
    }

    /// Decode exactly one value per field. Returns `None` unless `bytes` is
    /// exactly [`Layout::width`] long.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> Option<Vec<WireValue>> {
        if bytes.len() != self.width() {
            return None;
        }
        let mut rest = bytes;
        let mut values = Vec::with_capacity(self.fields.len());
        for &code in &self.fields {
            let (value, tail) = WireValue::read(code, rest)?;
            values.push(value);
            rest = tail;
        }
        Some(values)
    }
}

impl fmt::Display for Layout {
    /// Compact format string, with runs collapsed into repeat counts.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for run in self.fields.chunk_by(|a, b| a == b) {
            if run.len() > 1 {
                write!(f, "{}", run.len())?;
            }
            write!(f, "{}", run[0].as_char())?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Layout {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A primitive that can be a typed procedure argument.
pub trait WirePrimitive: Copy + 'static {
    /// The field this type encodes as.
    const CODE: FieldCode;

    /// Wrap the value.
    fn into_value(self) -> WireValue;

    /// Unwrap a decoded value of the matching variant.
    fn from_value(value: WireValue) -> Option<Self>;
}

macro_rules! impl_wire_primitive {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl WirePrimitive for $ty {
                const CODE: FieldCode = FieldCode::$variant;

                fn into_value(self) -> WireValue {
                    WireValue::$variant(self)
                }

                fn from_value(value: WireValue) -> Option<Self> {
                    match value {
                        WireValue::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for WireValue {
                fn from(value: $ty) -> Self {
                    WireValue::$variant(value)
                }
            }
        )+
    };
}

impl_wire_primitive! {
    i8 => I8,
    u8 => U8,
    bool => Bool,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
}

/// The argument list of a typed procedure.
///
/// Implemented for `()`, tuples of up to eight primitives and arrays of one
/// primitive type.
pub trait WireArgs: Sized + 'static {
    /// The layout these arguments encode as.
    fn layout() -> Layout;

    /// The arguments as wire values, in layout order.
    fn to_values(&self) -> Vec<WireValue>;

    /// Rebuild the arguments from decoded values.
    fn from_values(values: &[WireValue]) -> Option<Self>;
}

impl WireArgs for () {
    fn layout() -> Layout {
        Layout::default()
    }

    fn to_values(&self) -> Vec<WireValue> {
        Vec::new()
    }

    fn from_values(values: &[WireValue]) -> Option<Self> {
        values.is_empty().then_some(())
    }
}

impl<T: WirePrimitive, const N: usize> WireArgs for [T; N] {
    fn layout() -> Layout {
        Layout::from_fields(vec![T::CODE; N])
    }

    fn to_values(&self) -> Vec<WireValue> {
        self.iter().map(|v| v.into_value()).collect()
    }

    fn from_values(values: &[WireValue]) -> Option<Self> {
        let items: Vec<T> = values
            .iter()
            .map(|v| T::from_value(*v))
            .collect::<Option<_>>()?;
        items.try_into().ok()
    }
}

macro_rules! impl_wire_args {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: WirePrimitive),+> WireArgs for ($($name,)+) {
            fn layout() -> Layout {
                Layout::from_fields(vec![$($name::CODE),+])
            }

            fn to_values(&self) -> Vec<WireValue> {
                vec![$(self.$idx.into_value()),+]
            }

            fn from_values(values: &[WireValue]) -> Option<Self> {
                let mut iter = values.iter().copied();
                let args = ($($name::from_value(iter.next()?)?,)+);
                iter.next().is_none().then_some(args)
            }
        }
    };
}

impl_wire_args!(A 0);
impl_wire_args!(A 0, B 1);
impl_wire_args!(A 0, B 1, C 2);
impl_wire_args!(A 0, B 1, C 2, D 3);
impl_wire_args!(A 0, B 1, C 2, D 3, E 4);
impl_wire_args!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_wire_args!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_wire_args!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
