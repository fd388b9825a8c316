use std::fmt::{Display, Formatter};

use xref_value::PrimitiveKind;

/// Logs, then panics. For conditions the process can't recover from: the workspace profiles
/// abort on panic.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::error::fatal_error(format!($($arg)+))
    };
}

#[doc(hidden)]
#[cold]
pub fn fatal_error(message: String) -> ! {
    log::error!("fatal: {message}");
    panic!("{message}")
}

/// What can go wrong when crossing the bridge, short of aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// A managed exception the boundary declared convertible.
    Exception {
        type_name: String,
        message: Option<String>,
    },
    /// Unboxing an object that is not a box of the requested primitive.
    TypeMismatch { expected: PrimitiveKind, found: String },
    /// A null handle where an object was required.
    NullReference,
    /// The native class a wrapper would get isn't compatible with the requested one.
    IncompatibleWrapperClass { class: String, expected: String },
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Exception {
                type_name,
                message: Some(message),
            } => write!(f, "{type_name}: {message}"),
            BridgeError::Exception { type_name, message: None } => write!(f, "{type_name}"),
            BridgeError::TypeMismatch { expected, found } => {
                write!(f, "expected a boxed `{expected}`, found an instance of `{found}`")
            }
            BridgeError::NullReference => write!(f, "null reference"),
            BridgeError::IncompatibleWrapperClass { class, expected } => {
                write!(f, "native class `{class}` is not a subclass of `{expected}`")
            }
        }
    }
}

impl std::error::Error for BridgeError {}
