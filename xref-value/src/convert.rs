use anyhow::{Context, Error};

use crate::value::{KChar, Primitive, PrimitiveKind};

/// A Rust type that has a boxed counterpart on the managed heap.
///
/// The bridge is generic over this: `box_value::<i32>` allocates an `Int` box, `unbox::<i32>`
/// reads one back, and any other kind of box is rejected by the `TryFrom` conversion.
pub trait Boxable: Copy + Into<Primitive> + TryFrom<Primitive, Error = Error> {
    const KIND: PrimitiveKind;
}

macro_rules! primitive_conversions {
    ($($ty:ty => $variant:ident, $getter:ident;)*) => {
        impl Primitive {
            $(
                #[inline(always)]
                pub fn $getter(self) -> Option<$ty> {
                    match self {
                        Primitive::$variant(value) => Some(value),
                        _ => None,
                    }
                }
            )*
        }

        $(
            impl From<$ty> for Primitive {
                fn from(value: $ty) -> Self {
                    Primitive::$variant(value)
                }
            }

            impl TryFrom<Primitive> for $ty {
                type Error = Error;

                fn try_from(value: Primitive) -> Result<Self, Self::Error> {
                    value.$getter().with_context(|| {
                        format!(
                            "value was not a `{}` type (found `{}`)",
                            PrimitiveKind::$variant,
                            value.kind()
                        )
                    })
                }
            }

            impl Boxable for $ty {
                const KIND: PrimitiveKind = PrimitiveKind::$variant;
            }
        )*
    };
}

primitive_conversions! {
    bool => Boolean, as_boolean;
    KChar => Char, as_char;
    i8 => Byte, as_byte;
    i16 => Short, as_short;
    i32 => Int, as_int;
    i64 => Long, as_long;
    u8 => UByte, as_ubyte;
    u16 => UShort, as_ushort;
    u32 => UInt, as_uint;
    u64 => ULong, as_ulong;
    f32 => Float, as_float;
    f64 => Double, as_double;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_from_rejects_other_kinds() {
        let err = i32::try_from(Primitive::Long(3)).unwrap_err();
        assert!(err.to_string().contains("`Int`"));
        assert!(err.to_string().contains("`Long`"));
    }

    #[test]
    fn kind_constants_match_variants() {
        assert_eq!(<KChar as Boxable>::KIND, PrimitiveKind::Char);
        assert_eq!(<u16 as Boxable>::KIND, PrimitiveKind::UShort);
        assert_eq!(Primitive::from(KChar(7)).kind(), PrimitiveKind::Char);
    }
}
