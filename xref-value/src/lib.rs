/// The fixed set of primitive kinds, and the primitive value representation itself.
pub mod value;
/// To convert primitive values to Rust types, and vice versa.
pub mod convert;

pub use convert::Boxable;
pub use value::{KChar, Primitive, PrimitiveKind};
