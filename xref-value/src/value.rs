use std::fmt;
use std::hash::{Hash, Hasher};

static_assertions::assert_eq_size!(KChar, u16);
static_assertions::const_assert_eq!(PrimitiveKind::ALL.len(), 12);

/// A UTF-16 code unit. Kotlin's `Char` is not a Rust `char`: lone surrogates are valid values.
///
/// It has to be its own type since `UShort` is also a `u16`, and both need their own conversions.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KChar(pub u16);

impl From<KChar> for u16 {
    fn from(value: KChar) -> Self {
        value.0
    }
}

/// Every primitive type that can cross the bridge in boxed form.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean = 0,
    Char,
    Byte,
    Short,
    Int,
    Long,
    UByte,
    UShort,
    UInt,
    ULong,
    Float,
    Double,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 12] = [
        PrimitiveKind::Boolean,
        PrimitiveKind::Char,
        PrimitiveKind::Byte,
        PrimitiveKind::Short,
        PrimitiveKind::Int,
        PrimitiveKind::Long,
        PrimitiveKind::UByte,
        PrimitiveKind::UShort,
        PrimitiveKind::UInt,
        PrimitiveKind::ULong,
        PrimitiveKind::Float,
        PrimitiveKind::Double,
    ];

    /// Name of the managed box type for this primitive.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "Boolean",
            PrimitiveKind::Char => "Char",
            PrimitiveKind::Byte => "Byte",
            PrimitiveKind::Short => "Short",
            PrimitiveKind::Int => "Int",
            PrimitiveKind::Long => "Long",
            PrimitiveKind::UByte => "UByte",
            PrimitiveKind::UShort => "UShort",
            PrimitiveKind::UInt => "UInt",
            PrimitiveKind::ULong => "ULong",
            PrimitiveKind::Float => "Float",
            PrimitiveKind::Double => "Double",
        }
    }

    /// Size of the unboxed value, in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            PrimitiveKind::Boolean | PrimitiveKind::Byte | PrimitiveKind::UByte => 1,
            PrimitiveKind::Char | PrimitiveKind::Short | PrimitiveKind::UShort => 2,
            PrimitiveKind::Int | PrimitiveKind::UInt | PrimitiveKind::Float => 4,
            PrimitiveKind::Long | PrimitiveKind::ULong | PrimitiveKind::Double => 8,
        }
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, PrimitiveKind::Float | PrimitiveKind::Double)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            PrimitiveKind::UByte | PrimitiveKind::UShort | PrimitiveKind::UInt | PrimitiveKind::ULong
        )
    }

    /// Whether this kind is a numeric type (as opposed to `Boolean` and `Char`).
    pub fn is_number(self) -> bool {
        !matches!(self, PrimitiveKind::Boolean | PrimitiveKind::Char)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An unboxed primitive value, as stored in the payload of a managed box object.
///
/// Equality and hashing go through the raw bits, so that a `NaN` compares equal to itself
/// as long as the payload is the same. That's what boxing round trips need to preserve.
#[derive(Debug, Copy, Clone)]
pub enum Primitive {
    Boolean(bool),
    Char(KChar),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    UByte(u8),
    UShort(u16),
    UInt(u32),
    ULong(u64),
    Float(f32),
    Double(f64),
}

impl Primitive {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Boolean(_) => PrimitiveKind::Boolean,
            Primitive::Char(_) => PrimitiveKind::Char,
            Primitive::Byte(_) => PrimitiveKind::Byte,
            Primitive::Short(_) => PrimitiveKind::Short,
            Primitive::Int(_) => PrimitiveKind::Int,
            Primitive::Long(_) => PrimitiveKind::Long,
            Primitive::UByte(_) => PrimitiveKind::UByte,
            Primitive::UShort(_) => PrimitiveKind::UShort,
            Primitive::UInt(_) => PrimitiveKind::UInt,
            Primitive::ULong(_) => PrimitiveKind::ULong,
            Primitive::Float(_) => PrimitiveKind::Float,
            Primitive::Double(_) => PrimitiveKind::Double,
        }
    }

    /// The payload bits of the value, zero-extended to 64 bits.
    /// Signed values are stored as their two's complement of the *original* width.
    pub fn to_bits(self) -> u64 {
        match self {
            Primitive::Boolean(v) => v as u64,
            Primitive::Char(v) => v.0 as u64,
            Primitive::Byte(v) => v as u8 as u64,
            Primitive::Short(v) => v as u16 as u64,
            Primitive::Int(v) => v as u32 as u64,
            Primitive::Long(v) => v as u64,
            Primitive::UByte(v) => v as u64,
            Primitive::UShort(v) => v as u64,
            Primitive::UInt(v) => v as u64,
            Primitive::ULong(v) => v,
            Primitive::Float(v) => v.to_bits() as u64,
            Primitive::Double(v) => v.to_bits(),
        }
    }

    /// Inverse of `to_bits`. Bits above the width of `kind` are ignored.
    pub fn from_bits(kind: PrimitiveKind, bits: u64) -> Self {
        match kind {
            PrimitiveKind::Boolean => Primitive::Boolean(bits & 1 != 0),
            PrimitiveKind::Char => Primitive::Char(KChar(bits as u16)),
            PrimitiveKind::Byte => Primitive::Byte(bits as u8 as i8),
            PrimitiveKind::Short => Primitive::Short(bits as u16 as i16),
            PrimitiveKind::Int => Primitive::Int(bits as u32 as i32),
            PrimitiveKind::Long => Primitive::Long(bits as i64),
            PrimitiveKind::UByte => Primitive::UByte(bits as u8),
            PrimitiveKind::UShort => Primitive::UShort(bits as u16),
            PrimitiveKind::UInt => Primitive::UInt(bits as u32),
            PrimitiveKind::ULong => Primitive::ULong(bits),
            PrimitiveKind::Float => Primitive::Float(f32::from_bits(bits as u32)),
            PrimitiveKind::Double => Primitive::Double(f64::from_bits(bits)),
        }
    }

    /// The value as a signed integer, for the integral kinds that fit in an `i64`.
    /// Used for deciding whether a value lives in the box cache.
    pub fn as_integral(self) -> Option<i64> {
        match self {
            Primitive::Char(v) => Some(v.0 as i64),
            Primitive::Byte(v) => Some(v as i64),
            Primitive::Short(v) => Some(v as i64),
            Primitive::Int(v) => Some(v as i64),
            Primitive::Long(v) => Some(v),
            Primitive::UByte(v) => Some(v as i64),
            Primitive::UShort(v) => Some(v as i64),
            Primitive::UInt(v) => Some(v as i64),
            Primitive::Boolean(_) | Primitive::ULong(_) | Primitive::Float(_) | Primitive::Double(_) => None,
        }
    }
}

impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.to_bits() == other.to_bits()
    }
}

impl Eq for Primitive {}

impl Hash for Primitive {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.to_bits().hash(state);
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Boolean(v) => write!(f, "{v}"),
            Primitive::Char(v) => match char::from_u32(v.0 as u32) {
                Some(c) => write!(f, "'{c}'"),
                None => write!(f, "'\\u{{{:04x}}}'", v.0),
            },
            Primitive::Byte(v) => write!(f, "{v}"),
            Primitive::Short(v) => write!(f, "{v}"),
            Primitive::Int(v) => write!(f, "{v}"),
            Primitive::Long(v) => write!(f, "{v}L"),
            Primitive::UByte(v) => write!(f, "{v}u"),
            Primitive::UShort(v) => write!(f, "{v}u"),
            Primitive::UInt(v) => write!(f, "{v}u"),
            Primitive::ULong(v) => write!(f, "{v}uL"),
            Primitive::Float(v) => write!(f, "{v}f"),
            Primitive::Double(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_payloads_compare_by_bits() {
        let a = Primitive::Double(f64::from_bits(0x7FF8_0000_0000_0001));
        let b = Primitive::Double(f64::from_bits(0x7FF8_0000_0000_0001));
        let c = Primitive::Double(f64::NAN);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn zero_signs_are_distinct() {
        assert_ne!(Primitive::Float(0.0), Primitive::Float(-0.0));
    }

    #[test]
    fn same_bits_different_kinds_differ() {
        assert_ne!(Primitive::UShort(65), Primitive::Char(KChar(65)));
        assert_ne!(Primitive::Int(-1), Primitive::UInt(u32::MAX));
    }

    #[test]
    fn bits_keep_original_width() {
        assert_eq!(Primitive::Byte(-1).to_bits(), 0xFF);
        assert_eq!(Primitive::Short(-1).to_bits(), 0xFFFF);
        assert_eq!(Primitive::from_bits(PrimitiveKind::Byte, 0xFF), Primitive::Byte(-1));
    }
}
