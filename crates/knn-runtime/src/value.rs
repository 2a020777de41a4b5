//! Opaque identifiers and call values.
//!
//! Identifiers are plain `Copy` handles. Whether one is still valid is up to
//! the [`Env`](crate::Env) that issued it; holding an identifier does not keep
//! anything alive.

use std::fmt;

use crate::error::RuntimeError;

/// Reference to a managed object. Never null; nullable values use `Option<ObjRef>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u64);

impl ObjRef {
    /// Wrap a raw reference, mapping `0` to `None`.
    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj@{:#x}", self.0)
    }
}

/// Durable identity of a managed class.
///
/// Issued by [`Env::class_of`](crate::Env::class_of); stays valid for the
/// lifetime of the runtime, so it can key process-wide caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassRef(u64);

impl ClassRef {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Resolved, call-ready method binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(u64);

impl MethodId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Expected return type of a managed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    Int,
    Object,
}

/// Argument or return value of a managed call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Void,
    Int(i32),
    Long(i64),
    Object(Option<ObjRef>),
}

impl Value {
    /// Extract an `int` return value.
    pub fn into_int(self) -> Result<i32, RuntimeError> {
        match self {
            Value::Int(v) => Ok(v),
            other => Err(RuntimeError::TypeMismatch {
                expected: "int",
                actual: other.kind_name().to_string(),
            }),
        }
    }

    /// Extract a (nullable) object return value.
    pub fn into_object(self) -> Result<Option<ObjRef>, RuntimeError> {
        match self {
            Value::Object(v) => Ok(v),
            other => Err(RuntimeError::TypeMismatch {
                expected: "object",
                actual: other.kind_name().to_string(),
            }),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Object(_) => "object",
        }
    }
}
